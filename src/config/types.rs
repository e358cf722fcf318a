//! Configuration type definitions for AgentGate
//!
//! This module defines all configuration structs used by the control plane.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::security::{LevelPolicy, PermissionLevel};

/// Main configuration struct for AgentGate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent loop configuration (default model, autoapproval rules)
    #[serde(rename = "loop")]
    pub agent_loop: LoopConfig,
    /// Permission lattice configuration
    pub permissions: PermissionsConfig,
    /// Validation pipeline configuration
    pub validation: ValidationConfig,
    /// Context compaction configuration
    pub compaction: CompactionConfig,
    /// External checkpoint / approval / session-state services
    pub services: ServicesConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Loop Configuration
// ============================================================================

/// Tools that mutate state or execute code. They require approval unless a
/// rule in `auto_approval` explicitly whitelists them.
pub const DEFAULT_DANGEROUS_TOOLS: &[&str] =
    &["write_file", "modify_file", "delete_file", "execute_command"];

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Model reported in run metadata when the caller does not pick one.
    pub default_model: String,
    /// Explicit tool -> autoapprove rules. `true` skips approval, `false` forces it.
    pub auto_approval: BTreeMap<String, bool>,
    /// Tools that require approval unless whitelisted.
    pub dangerous_tools: Vec<String>,
    /// Approval timeout for gated tools that belong to no permission tier.
    pub default_approval_timeout_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        let auto_approval = [
            ("read_file", true),
            ("search_files", true),
            ("execute_command", false),
            ("write_file", false),
            ("modify_file", false),
            ("delete_file", false),
        ]
        .into_iter()
        .map(|(tool, allow)| (tool.to_string(), allow))
        .collect();

        Self {
            default_model: "deepseek-chat".to_string(),
            auto_approval,
            dangerous_tools: DEFAULT_DANGEROUS_TOOLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_approval_timeout_ms: 30_000,
        }
    }
}

// ============================================================================
// Permission Configuration
// ============================================================================

/// Permission lattice configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Level every new session starts at.
    pub default_level: PermissionLevel,
    /// Start sessions at `system` regardless of `default_level`.
    pub dev_mode: bool,
    /// Policy for the `basic` tier.
    pub basic: LevelPolicy,
    /// Policy for the `operation` tier.
    pub operation: LevelPolicy,
    /// Policy for the `system` tier.
    pub system: LevelPolicy,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            default_level: PermissionLevel::Basic,
            dev_mode: false,
            basic: LevelPolicy::builtin(PermissionLevel::Basic),
            operation: LevelPolicy::builtin(PermissionLevel::Operation),
            system: LevelPolicy::builtin(PermissionLevel::System),
        }
    }
}

impl PermissionsConfig {
    /// Level a freshly constructed authority should start at.
    pub fn initial_level(&self) -> PermissionLevel {
        if self.dev_mode {
            PermissionLevel::System
        } else {
            self.default_level
        }
    }

    /// Policy configured for `level`.
    pub fn policy(&self, level: PermissionLevel) -> &LevelPolicy {
        match level {
            PermissionLevel::Basic => &self.basic,
            PermissionLevel::Operation => &self.operation,
            PermissionLevel::System => &self.system,
        }
    }
}

// ============================================================================
// Validation Configuration
// ============================================================================

/// Target patterns rejected by the execution precheck.
pub const DEFAULT_DENIED_TARGETS: &[&str] = &[
    r"\.\.",
    r"^/etc/",
    r"^/sys/",
    r"^/proc/",
    r"(?i)^C:\\Windows",
];

/// Validation pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Regexes; a target matching any of them fails the precheck.
    pub denied_targets: Vec<String>,
    /// Method -> parameter keys that must be present.
    pub required_params: BTreeMap<String, Vec<String>>,
    /// Framework -> files that must appear among the visible files.
    pub framework_manifests: BTreeMap<String, Vec<String>>,
    /// Variable that must be set for execute-scope actions in production.
    pub runtime_mode_var: String,
    /// Project environment name treated as production.
    pub production_env: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let required_params = [
            ("write_file", vec!["path", "content"]),
            ("execute_command", vec!["command"]),
            ("read_file", vec!["path"]),
            ("ensure_file", vec!["path", "content"]),
        ];
        let framework_manifests = ["vue", "react", "next", "nuxt"]
            .into_iter()
            .map(|fw| (fw.to_string(), vec!["package.json".to_string()]))
            .collect();

        Self {
            denied_targets: DEFAULT_DENIED_TARGETS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            required_params: required_params
                .into_iter()
                .map(|(method, keys)| {
                    (
                        method.to_string(),
                        keys.into_iter().map(String::from).collect(),
                    )
                })
                .collect(),
            framework_manifests,
            runtime_mode_var: "NODE_ENV".to_string(),
            production_env: "production".to_string(),
        }
    }
}

// ============================================================================
// Compaction Configuration
// ============================================================================

/// Words that raise the score of a history item and mark a sentence worth keeping.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "error", "warning", "success", "failed", "created", "updated", "deleted", "install", "build",
    "deploy", "test", "错误", "警告", "成功", "失败", "创建", "更新", "删除", "安装", "构建",
    "部署", "测试",
];

/// Context compaction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Number of history items kept after scoring.
    pub max_history_count: usize,
    /// Multiplier applied once per matched keyword.
    pub keyword_weight: f64,
    /// Upper bound for the combined keyword multiplier.
    pub keyword_cap: f64,
    /// Per-minute decay applied to an item's age.
    pub time_decay_factor: f64,
    /// Base raised to an item's position in the buffer.
    pub position_weight: f64,
    /// Items at or below this many characters are kept verbatim.
    pub min_retain_length: usize,
    /// Keywords used for scoring and sentence selection.
    pub keywords: Vec<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_history_count: 10,
            keyword_weight: 1.5,
            keyword_cap: 3.0,
            time_decay_factor: 0.95,
            position_weight: 1.1,
            min_retain_length: 50,
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ============================================================================
// Services Configuration
// ============================================================================

/// External service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Base URL of the terminal API (checkpoints, approvals, state).
    pub base_url: String,
    /// Optional bearer token sent with every request.
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/terminal".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// Compact single-line output with component tags
    #[default]
    Component,
    /// JSON lines
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "component" => Ok(LogFormat::Component),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Optional file to append JSON logs to.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Component,
            file: None,
        }
    }
}
