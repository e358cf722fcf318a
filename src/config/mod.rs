//! Configuration management for AgentGate
//!
//! Configuration is loaded from `~/.agentgate/config.json` with environment
//! variable overrides. There is no process-wide configuration instance: callers
//! load a `Config` and hand the relevant sections to the components they build.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{GateError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the AgentGate configuration directory path (~/.agentgate)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agentgate")
    }

    /// Returns the path to the config file (~/.agentgate/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `AGENTGATE_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: AGENTGATE_SECTION_KEY
    pub(crate) fn apply_env_overrides(&mut self) {
        // Loop
        if let Ok(val) = std::env::var("AGENTGATE_LOOP_DEFAULT_MODEL") {
            self.agent_loop.default_model = val;
        }
        if let Ok(val) = std::env::var("AGENTGATE_LOOP_APPROVAL_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.agent_loop.default_approval_timeout_ms = v;
            }
        }

        // Permissions
        if let Ok(val) = std::env::var("AGENTGATE_PERMISSIONS_DEFAULT_LEVEL") {
            match val.parse() {
                Ok(level) => self.permissions.default_level = level,
                Err(e) => tracing::warn!("Ignoring AGENTGATE_PERMISSIONS_DEFAULT_LEVEL: {}", e),
            }
        }
        if let Ok(val) = std::env::var("AGENTGATE_PERMISSIONS_DEV_MODE") {
            self.permissions.dev_mode = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
        }

        // Compaction
        if let Ok(val) = std::env::var("AGENTGATE_COMPACTION_MAX_HISTORY_COUNT") {
            if let Ok(v) = val.parse() {
                self.compaction.max_history_count = v;
            }
        }

        // Services
        if let Ok(val) = std::env::var("AGENTGATE_SERVICES_BASE_URL") {
            self.services.base_url = val;
        }
        if let Ok(val) = std::env::var("AGENTGATE_SERVICES_TOKEN") {
            if !val.is_empty() {
                self.services.token = Some(val);
            }
        }

        // Logging
        if let Ok(val) = std::env::var("AGENTGATE_LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("AGENTGATE_LOGGING_FORMAT") {
            if let Ok(format) = val.parse() {
                self.logging.format = format;
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| GateError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
