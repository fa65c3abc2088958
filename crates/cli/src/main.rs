//! runwarden CLI, the main entry point.
//!
//! Commands:
//! - `agent`   Single message or interactive chat with the budgeted agent
//! - `config`  Show, locate or validate the configuration
//! - `tools`   List the registered tools and their argument schemas

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "runwarden",
    about = "runwarden: a budgeted agent loop with tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of ~/.runwarden/config.toml
    #[arg(long, global = true, env = "RUNWARDEN_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Session to continue; a new one is created when omitted
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List available tools
    Tools {
        /// Print each tool's argument schema
        #[arg(long)]
        schema: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration and report warnings
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Agent { message, session } => {
            let config = commands::load_config(config_path)?;
            commands::agent::run(config, message, session).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
        Commands::Tools { schema } => {
            let config = commands::load_config(config_path)?;
            commands::tools::run(&config, schema)?
        }
    }

    Ok(())
}

/// Logs go to stderr so answers on stdout stay clean.
fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
