//! Agent module - run life cycle, decision ingestion and context compaction
//!
//! The [`AgentLoopController`] owns one session's run. It deduplicates model
//! decisions, keeps the task list, gates tool calls behind the permission
//! authority and records checkpoints at loop boundaries.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────────────┐
//! │   Decision  │────>│ AgentLoop-      │────>│ PermissionAuthority │
//! │  (model)    │     │ Controller      │     │  (approval gate)    │
//! └─────────────┘     └─────────────────┘     └─────────────────────┘
//!                        │          │                   │
//!                        ▼          ▼                   ▼
//!               ┌────────────┐ ┌────────────┐   ┌──────────────┐
//!               │ Checkpoint │ │  Context   │   │  Approval    │
//!               │  service   │ │ Compactor  │   │  notifier    │
//!               └────────────┘ └────────────┘   └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agentgate::agent::{AgentLoopController, Decision, LoopAction, LoopServices};
//! use agentgate::config::Config;
//! use agentgate::security::PermissionAuthority;
//!
//! async fn run() -> agentgate::Result<()> {
//!     let config = Config::default();
//!     let authority = Arc::new(PermissionAuthority::new(&config.permissions));
//!     let controller =
//!         AgentLoopController::new("session-1", &config, authority, LoopServices::in_memory())?;
//!
//!     controller.start_loop("build app", None).await?;
//!     let action = controller
//!         .process_decision(Decision::tool_call("d1", "write_file"))
//!         .await?;
//!     if let LoopAction::WaitApproval { decision_id, .. } = action {
//!         controller.approve_tool(&decision_id, None).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod compaction;
pub mod decision;
mod r#loop;
pub mod registry;
pub mod types;

pub use compaction::{
    estimate_tokens, summarize_project_files, CompactionResult, ContextCompactor, HistoryItem,
    HistoryKind,
};
pub use decision::{Decision, DecisionKind, LoopAction};
pub use r#loop::{
    AgentLoopController, LoopServices, ToolCall, APPROVAL_TIMEOUT_REASON, EXTERNAL_REJECT_REASON,
};
pub use registry::LoopRegistry;
pub use types::{AgentRun, LoopStats, RunInfo, RunStatus, Task, TaskState, TaskStatus};
