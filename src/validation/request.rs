//! Inbound action envelope and per-gate result types.
//!
//! Field names follow the client's camelCase wire format so a terminal
//! message can be deserialized as-is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::security::{ActionScope, PermissionLevel};

/// One proposed action together with the context it was proposed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    #[serde(default)]
    pub meta: MessageMeta,
    #[serde(default)]
    pub context: ActionContext,
    pub action: ToolAction,
}

impl ValidationRequest {
    pub fn new(action: ToolAction) -> Self {
        Self {
            meta: MessageMeta::default(),
            context: ActionContext::default(),
            action,
        }
    }

    pub fn with_context(mut self, context: ActionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_meta(mut self, meta: MessageMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// Envelope metadata. `message_id` doubles as the decision id when the action
/// needs approval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageMeta {
    pub session: String,
    pub token: u64,
    pub timestamp: i64,
    pub message_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionContext {
    pub project: ProjectContext,
    /// Summarized recent history.
    pub history: Vec<String>,
    pub visible_files: Vec<String>,
    pub visible_functions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectContext {
    /// development / production / test
    pub env: String,
    pub lang: Vec<String>,
    pub framework: String,
    pub root: Vec<String>,
}

impl Default for ProjectContext {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            lang: Vec::new(),
            framework: "generic".to_string(),
            root: Vec::new(),
        }
    }
}

/// The action itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAction {
    pub scope: ActionScope,
    #[serde(default)]
    pub target: String,
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(alias = "requiredLevel")]
    pub required_permission: PermissionLevel,
}

impl ToolAction {
    pub fn new(method: &str, scope: ActionScope, level: PermissionLevel, target: &str) -> Self {
        Self {
            scope,
            target: target.to_string(),
            method: method.to_string(),
            params: Map::new(),
            required_permission: level,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// The four gates, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    IntentRecognition,
    PermissionCheck,
    EnvironmentDetection,
    OperationExecution,
}

impl ValidationPhase {
    pub const ORDER: [ValidationPhase; 4] = [
        ValidationPhase::IntentRecognition,
        ValidationPhase::PermissionCheck,
        ValidationPhase::EnvironmentDetection,
        ValidationPhase::OperationExecution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationPhase::IntentRecognition => "intent_recognition",
            ValidationPhase::PermissionCheck => "permission_check",
            ValidationPhase::EnvironmentDetection => "environment_detection",
            ValidationPhase::OperationExecution => "operation_execution",
        }
    }
}

impl std::fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub phase: ValidationPhase,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
}

/// Outcome of a full pipeline run. `all_passed == false` means "do not execute".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationContext {
    pub results: Vec<ValidationResult>,
    pub all_passed: bool,
    pub total_duration_ms: u64,
}

impl ValidationContext {
    /// The gate that stopped the pipeline, if any.
    pub fn failure(&self) -> Option<&ValidationResult> {
        self.results.iter().find(|r| !r.passed)
    }
}
