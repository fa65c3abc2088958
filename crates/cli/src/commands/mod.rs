pub mod agent;
pub mod config_cmd;
pub mod tools;

use std::path::Path;

use anyhow::Context;
use runwarden_config::AppConfig;

/// Load the config from `path`, or the default location, with environment
/// overrides applied.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = path.map_or_else(AppConfig::config_path, Path::to_path_buf);
    AppConfig::load_with_env(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
