//! `runwarden config`: configuration management commands.

use std::path::Path;

use runwarden_config::AppConfig;

use super::load_config;

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = redacted(load_config(path)?);
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(path: Option<&Path>) {
    let path = path.map_or_else(AppConfig::config_path, Path::to_path_buf);
    println!("{}", path.display());
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("Validating configuration...");
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e:#}");
            return Err(e);
        }
    };
    println!("   Config parsed and validated");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Provider:   {}", config.default_provider);
    println!("   Model:      {}", config.default_model);
    if !config.fallback_models.is_empty() {
        println!("   Fallbacks:  {}", config.fallback_models.join(", "));
    }
    println!(
        "   Budget:     {} tool calls, {}s, {} tokens, ${:.2}",
        config.budget.max_tool_calls,
        config.budget.max_time_seconds,
        config.budget.max_tokens,
        config.budget.max_cost
    );
    println!("   Tools:      {}", config.tools.allowed_tools.join(", "));
    Ok(())
}

/// Settings that load fine but will likely cause trouble at run time.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let local = matches!(
        config.default_provider.as_str(),
        "ollama" | "vllm" | "llamacpp" | "custom"
    );
    if !local && !config.has_api_key() {
        warnings.push("No API key set (set RUNWARDEN_API_KEY or OPENROUTER_API_KEY)".into());
    }
    if config.budget.max_tool_calls == 0 {
        warnings.push("budget.max_tool_calls is 0: no tool will ever run".into());
    }
    if config.tools.timeout_seconds as f64 >= config.budget.max_time_seconds {
        warnings.push(
            "tools.timeout_seconds is not below budget.max_time_seconds: the run budget \
             will cut tools off first"
                .into(),
        );
    }
    if config.retry.max_repair_attempts == 0 {
        warnings.push("retry.max_repair_attempts is 0: malformed model output ends the run".into());
    }
    if config.fallback_models.contains(&config.default_model) {
        warnings.push("fallback_models repeats default_model".into());
    }
    warnings
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".into());
    }
    config
}
