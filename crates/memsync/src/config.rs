//! Configuration file support

use std::path::Path;

use anyhow::{Context, Result};
use memsync_sync::SyncConfig;
use serde::Deserialize;

/// Contents of `memsync.toml`
///
/// ```toml
/// log_level = "debug"
///
/// [sync]
/// batch_size = 50
/// pull_limit = 200
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub sync: SyncConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
