//! Shared CLI helpers used across multiple command handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use agentgate::config::Config;

/// Expand `~/` prefix to the user's home directory.
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let Some(raw) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(stripped) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

pub(crate) fn read_text(path: &Path) -> Result<String> {
    let path = expand_tilde(path);
    std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Parse a whole JSON file.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = read_text(path)?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Load the config file (defaults when missing).
pub(crate) fn load_config() -> Result<Config> {
    Config::load().with_context(|| format!("Failed to load {}", Config::path().display()))
}
