//! Decisions emitted by the driving model and the controller's answer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::Task;
use crate::security::ActionScope;

/// One instruction from the model. `decision_id` is the idempotency key.
///
/// ```json
/// {"decision_id": "d1", "type": "TOOL_CALL", "action": "write_file", "params": {"path": "a.txt"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(alias = "decisionId")]
    pub decision_id: String,
    #[serde(flatten)]
    pub kind: DecisionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    TaskList {
        tasks: Vec<Task>,
    },
    ToolCall {
        /// Tool name.
        action: String,
        #[serde(default)]
        params: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<ActionScope>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    TaskComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Pause {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

impl DecisionKind {
    pub fn name(&self) -> &'static str {
        match self {
            DecisionKind::TaskList { .. } => "TASK_LIST",
            DecisionKind::ToolCall { .. } => "TOOL_CALL",
            DecisionKind::TaskComplete { .. } => "TASK_COMPLETE",
            DecisionKind::Pause { .. } => "PAUSE",
            DecisionKind::Error { .. } => "ERROR",
        }
    }
}

impl Decision {
    pub fn new(decision_id: impl Into<String>, kind: DecisionKind) -> Self {
        Self {
            decision_id: decision_id.into(),
            kind,
        }
    }

    pub fn task_list(decision_id: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self::new(decision_id, DecisionKind::TaskList { tasks })
    }

    pub fn tool_call(decision_id: impl Into<String>, action: &str) -> Self {
        Self::new(
            decision_id,
            DecisionKind::ToolCall {
                action: action.to_string(),
                params: Map::new(),
                scope: None,
                target: None,
            },
        )
    }

    pub fn task_complete(decision_id: impl Into<String>) -> Self {
        Self::new(decision_id, DecisionKind::TaskComplete { summary: None })
    }

    pub fn pause(decision_id: impl Into<String>, reason: Option<&str>) -> Self {
        Self::new(
            decision_id,
            DecisionKind::Pause {
                reason: reason.map(str::to_string),
            },
        )
    }

    pub fn error(decision_id: impl Into<String>, message: &str) -> Self {
        Self::new(
            decision_id,
            DecisionKind::Error {
                message: message.to_string(),
            },
        )
    }

    /// Attach a parameter to a `TOOL_CALL`; other kinds are returned as-is.
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let DecisionKind::ToolCall { params, .. } = &mut self.kind {
            params.insert(key.to_string(), value.into());
        }
        self
    }

    /// One-line description used for the compaction buffer and logs.
    pub fn describe(&self) -> String {
        match &self.kind {
            DecisionKind::TaskList { tasks } => format!("TASK_LIST with {} tasks", tasks.len()),
            DecisionKind::ToolCall { action, .. } => format!("TOOL_CALL {}", action),
            DecisionKind::TaskComplete { summary } => match summary {
                Some(s) => format!("TASK_COMPLETE: {}", s),
                None => "TASK_COMPLETE".to_string(),
            },
            DecisionKind::Pause { reason } => match reason {
                Some(r) => format!("PAUSE: {}", r),
                None => "PAUSE".to_string(),
            },
            DecisionKind::Error { message } => format!("ERROR: {}", message),
        }
    }
}

/// What the caller should do after a decision was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopAction {
    /// Duplicate decision; nothing changed.
    Ignore,
    /// Keep calling the model.
    Continue,
    /// A human must approve before the tool may run.
    WaitApproval {
        decision_id: String,
        request_id: String,
        timeout_ms: u64,
    },
    /// Run the tool externally, then report with `tool_result`.
    Execute { decision_id: String, tool: String },
    Complete,
    Pause {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error { message: String },
}

impl LoopAction {
    pub fn name(&self) -> &'static str {
        match self {
            LoopAction::Ignore => "IGNORE",
            LoopAction::Continue => "CONTINUE",
            LoopAction::WaitApproval { .. } => "WAIT_APPROVAL",
            LoopAction::Execute { .. } => "EXECUTE",
            LoopAction::Complete => "COMPLETE",
            LoopAction::Pause { .. } => "PAUSE",
            LoopAction::Error { .. } => "ERROR",
        }
    }
}
