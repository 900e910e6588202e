//! Configuration file loading

use crate::error::CliError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "STECHUHR_CONFIG";

/// Fallback path when neither the flag nor the env var is set
const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

/// Portal connection settings
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the portal instance
    pub url: String,
    /// Username to log in with
    pub username: String,
    /// Password for the user
    pub password: String,
}

/// Resolve the configuration file path: `--config` flag, then the
/// environment override, then the default
fn resolve_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the configuration from the resolved YAML file
pub fn load(flag: Option<&Path>) -> Result<Config, CliError> {
    let path = resolve_path(flag);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        CliError::Config(format!(
            "failed to read configuration file {}: {e}",
            path.display()
        ))
    })?;
    serde_yaml::from_str(&raw).map_err(|e| {
        CliError::Config(format!(
            "invalid configuration file {}: {e}",
            path.display()
        ))
    })
}
