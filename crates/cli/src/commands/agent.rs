//! `runwarden agent`: single-message or interactive chat.
//!
//! Ctrl-C cancels the run in progress; the agent still answers with a
//! graceful stop describing what it had done.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use runwarden_agent::AgentLoop;
use runwarden_config::AppConfig;
use runwarden_core::{RunRequest, RunResult, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub async fn run(
    config: AppConfig,
    message: Option<String>,
    session: Option<String>,
) -> anyhow::Result<()> {
    let provider = runwarden_providers::build_provider(&config).with_context(|| {
        format!(
            "No usable model provider. Set RUNWARDEN_API_KEY (or OPENROUTER_API_KEY / \
             OPENAI_API_KEY) or add api_key to {}",
            AppConfig::config_path().display()
        )
    })?;
    let (registry, resources) = runwarden_tools::default_registry()?;
    let registry = Arc::new(registry);
    let tool_count = registry.len();
    let agent = AgentLoop::from_config(&config, provider, registry);
    let session = session.map_or_else(SessionId::new, |s| SessionId::from(s.as_str()));

    if let Some(msg) = message {
        let result = run_once(&agent, msg, &session).await;
        print!("{}", render_result(&result));
    } else {
        println!();
        println!("  runwarden agent, interactive mode");
        println!();
        println!("  Provider:  {}", config.default_provider);
        println!("  Model:     {}", config.default_model);
        println!("  Tools:     {tool_count} registered");
        println!(
            "  Budget:    {} tool calls, {}s, {} tokens, ${:.2} per message",
            config.budget.max_tool_calls,
            config.budget.max_time_seconds,
            config.budget.max_tokens,
            config.budget.max_cost
        );
        println!("  Session:   {session}");
        println!();
        println!("  Type your message and press Enter. Ctrl-C cancels a running");
        println!("  request; type 'exit' to quit.");
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("  You > ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "exit" | "quit") {
                break;
            }

            let result = run_once(&agent, line.to_string(), &session).await;
            println!();
            for text in render_result(&result).lines() {
                println!("  Assistant > {text}");
            }
            println!();
        }
        println!();
    }

    let closed = resources.release_session(&session).await;
    tracing::debug!(session_id = %session, closed, "Session resources released");
    Ok(())
}

/// Run one message; the first Ctrl-C cancels it.
async fn run_once(agent: &AgentLoop, message: String, session: &SessionId) -> RunResult {
    let cancel = CancellationToken::new();
    let run = agent.run(RunRequest::new(message, session.clone()), cancel.clone());
    tokio::pin!(run);

    loop {
        tokio::select! {
            result = &mut run => return result,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                eprintln!("\n  Cancelling...");
                cancel.cancel();
            }
        }
    }
}

/// The answer, then next steps for a stopped run, then a usage line.
fn render_result(result: &RunResult) -> String {
    let mut out = String::new();
    out.push_str(result.message.trim_end());
    out.push('\n');

    if !result.next_steps.is_empty() {
        out.push_str("\nNext steps:\n");
        for step in &result.next_steps {
            out.push_str(&format!("- {step}\n"));
        }
    }

    let usage = &result.usage;
    out.push_str(&format!(
        "\n[{} tool call(s), {} model call(s), {} tokens, ${:.4}, {:.1}s]\n",
        usage.tool_calls,
        usage.model_calls,
        usage.total_tokens,
        usage.cost,
        result.duration_ms as f64 / 1000.0
    ));
    out
}
