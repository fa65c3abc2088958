//! `runwarden tools`: list the registered tools.

use std::collections::HashSet;
use std::sync::Arc;

use runwarden_config::AppConfig;
use runwarden_core::ToolDefinition;
use runwarden_tools::ToolPipeline;

pub fn run(config: &AppConfig, schema: bool) -> anyhow::Result<()> {
    let (registry, _resources) = runwarden_tools::default_registry()?;
    let registry = Arc::new(registry);
    let pipeline = ToolPipeline::new(registry.clone(), &config.tools, &config.guardrails);
    let allowed: HashSet<String> = pipeline
        .allowed_definitions()
        .into_iter()
        .map(|d| d.name)
        .collect();

    print!("{}", render(&registry.definitions(), &allowed, schema));
    println!();
    println!("  Timeout:    {}s per call", config.tools.timeout_seconds);
    println!("  Scratch:    {}", pipeline.scratch_dir().display());
    Ok(())
}

fn render(definitions: &[ToolDefinition], allowed: &HashSet<String>, schema: bool) -> String {
    let width = definitions.iter().map(|d| d.name.len()).max().unwrap_or(0);
    let mut out = format!("Tools ({} registered, {} allowed)\n\n", definitions.len(), allowed.len());
    for def in definitions {
        let mark = if allowed.contains(&def.name) { " " } else { "x" };
        out.push_str(&format!("  [{mark}] {:<width$}  {}\n", def.name, def.description));
        if schema {
            let pretty = serde_json::to_string_pretty(&def.parameters).unwrap_or_default();
            for line in pretty.lines() {
                out.push_str(&format!("        {line}\n"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "calculator".into(),
                description: "Evaluate arithmetic".into(),
                parameters: json!({"type": "object", "required": ["expression"]}),
            },
            ToolDefinition {
                name: "echo".into(),
                description: "Echo a message".into(),
                parameters: json!({"type": "object"}),
            },
        ]
    }

    #[test]
    fn denied_tools_are_marked() {
        let allowed = HashSet::from(["calculator".to_string()]);
        let text = render(&defs(), &allowed, false);
        assert!(text.starts_with("Tools (2 registered, 1 allowed)"));
        assert!(text.contains("[ ] calculator"));
        assert!(text.contains("[x] echo"));
        assert!(!text.contains("required"));
    }

    #[test]
    fn schema_flag_prints_parameters() {
        let allowed = HashSet::new();
        let text = render(&defs(), &allowed, true);
        assert!(text.contains("\"required\""));
    }
}
