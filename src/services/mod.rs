//! External services consumed by the loop controller.
//!
//! Checkpoints, remote approval records and session state live outside this
//! crate. The controller only sees the traits below; [`http::TerminalClient`]
//! talks to the terminal REST API and [`memory`] keeps everything in process
//! (tests, the CLI replay command).

pub mod http;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

pub use http::TerminalClient;
pub use memory::{
    ApprovalCall, MemoryApprovalService, MemoryCheckpointService, MemorySessionStateService,
};

// ============================================================================
// Checkpoints
// ============================================================================

/// Why a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointKind {
    LoopStart,
    LoopEnd,
    Pause,
    Interrupt,
    Manual,
    UserMessage,
    ToolEdit,
    #[serde(other)]
    Other,
}

impl CheckpointKind {
    pub fn label(&self) -> &'static str {
        match self {
            CheckpointKind::LoopStart => "loop start",
            CheckpointKind::LoopEnd => "loop end",
            CheckpointKind::Pause => "pause",
            CheckpointKind::Interrupt => "interrupt",
            CheckpointKind::Manual => "manual",
            CheckpointKind::UserMessage => "user message",
            CheckpointKind::ToolEdit => "tool edit",
            CheckpointKind::Other => "other",
        }
    }
}

/// File content captured with a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileSnapshot {
    pub file_content: String,
    pub diff_areas: Vec<Value>,
}

/// Request to create a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDraft {
    pub session_id: String,
    pub message_order: usize,
    pub checkpoint_type: CheckpointKind,
    pub description: String,
    #[serde(default)]
    pub file_snapshots: BTreeMap<String, FileSnapshot>,
}

/// Opaque checkpoint record as returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub checkpoint_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default = "default_checkpoint_kind")]
    pub checkpoint_type: CheckpointKind,
    #[serde(default)]
    pub message_order: usize,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_checkpoint_kind() -> CheckpointKind {
    CheckpointKind::Manual
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointService: Send + Sync {
    /// Persist a checkpoint and return its record.
    async fn create(&self, draft: CheckpointDraft) -> Result<Checkpoint>;

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>>;

    /// Restore a checkpoint; returns the paths of the restored files.
    async fn jump(&self, checkpoint_id: &str) -> Result<Vec<String>>;

    async fn delete(&self, checkpoint_id: &str) -> Result<()>;

    /// Serialized checkpoint, as produced by the service.
    async fn export(&self, checkpoint_id: &str) -> Result<String>;
}

// ============================================================================
// Approvals
// ============================================================================

/// Remote approval record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteApproval {
    pub decision_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_params: Map<String, Value>,
    /// PENDING / APPROVED / REJECTED
    #[serde(default = "default_remote_status")]
    pub approval_status: String,
    #[serde(default)]
    pub approval_reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_remote_status() -> String {
    "PENDING".to_string()
}

/// Per-user approval preferences held by the approval service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApprovalSettings {
    pub auto_approve_dangerous_tools: bool,
    pub auto_approve_read_file: bool,
    pub auto_approve_file_edits: bool,
    pub auto_approve_mcp_tools: bool,
    pub include_tool_lint_errors: bool,
    pub max_checkpoints_per_session: u32,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            auto_approve_dangerous_tools: false,
            auto_approve_read_file: true,
            auto_approve_file_edits: false,
            auto_approve_mcp_tools: false,
            include_tool_lint_errors: true,
            max_checkpoints_per_session: 50,
        }
    }
}

#[async_trait]
pub trait ApprovalService: Send + Sync {
    async fn pending(&self, session_id: &str) -> Result<Vec<RemoteApproval>>;

    /// `Ok(false)` when the service declined (unknown or already resolved).
    async fn approve(&self, decision_id: &str, reason: Option<&str>) -> Result<bool>;

    async fn reject(&self, decision_id: &str, reason: &str) -> Result<bool>;

    async fn settings(&self) -> Result<ApprovalSettings>;

    async fn update_settings(&self, settings: &ApprovalSettings) -> Result<()>;

    /// Approve everything pending for the session; returns how many.
    async fn approve_all(&self, session_id: &str) -> Result<usize>;
}

// ============================================================================
// Session state
// ============================================================================

/// Remote view of a session. `status` is mapped onto [`crate::agent::RunStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub session_id: String,
    pub status: String,
    #[serde(default)]
    pub current_loop_id: Option<String>,
    #[serde(default)]
    pub interrupted: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStateService: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<SessionState>;

    /// Flag the session as interrupted.
    async fn interrupt(&self, session_id: &str) -> Result<bool>;

    async fn clear_interrupt(&self, session_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&CheckpointKind::LoopStart).unwrap(),
            "\"LOOP_START\""
        );
        let kind: CheckpointKind = serde_json::from_str("\"TOOL_EDIT\"").unwrap();
        assert_eq!(kind, CheckpointKind::ToolEdit);
        let kind: CheckpointKind = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(kind, CheckpointKind::Other);
    }

    #[test]
    fn test_checkpoint_record_tolerates_missing_fields() {
        let cp: Checkpoint = serde_json::from_str(r#"{"checkpointId": "cp-1"}"#).unwrap();
        assert_eq!(cp.checkpoint_id, "cp-1");
        assert_eq!(cp.checkpoint_type, CheckpointKind::Manual);
        assert!(cp.created_at.is_none());
    }

    #[test]
    fn test_approval_settings_defaults() {
        let settings: ApprovalSettings = serde_json::from_str("{}").unwrap();
        assert!(settings.auto_approve_read_file);
        assert!(!settings.auto_approve_dangerous_tools);
        assert_eq!(settings.max_checkpoints_per_session, 50);
    }

    #[test]
    fn test_remote_approval_from_wire() {
        let raw = r#"{
            "decisionId": "d1",
            "sessionId": "s1",
            "toolName": "write_file",
            "toolParams": {"path": "a.txt"},
            "approvalStatus": "PENDING",
            "createdAt": "2025-12-23T10:00:00Z"
        }"#;
        let approval: RemoteApproval = serde_json::from_str(raw).unwrap();
        assert_eq!(approval.tool_name, "write_file");
        assert!(approval.created_at.is_some());
    }
}
