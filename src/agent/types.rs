//! Run life cycle and task bookkeeping.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::GateError;

// ============================================================================
// Run status
// ============================================================================

/// Status of one agent run.
///
/// ```text
///  IDLE ──► PLANNING ──► RUNNING ◄──────────────┐
///                │          │                    │
///                ▼          ├──► WAITING_TOOL ───┤
///        (any of RUNNING's  ├──► WAITING_APPROVAL┤
///           targets)        ├──► PAUSED ─────────┘
///                           ├──► COMPLETED
///                           └──► ERROR
/// ```
///
/// COMPLETED and ERROR are terminal; only a new `start_loop` leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Idle,
    Planning,
    Running,
    WaitingTool,
    WaitingApproval,
    Paused,
    Error,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "IDLE",
            RunStatus::Planning => "PLANNING",
            RunStatus::Running => "RUNNING",
            RunStatus::WaitingTool => "WAITING_TOOL",
            RunStatus::WaitingApproval => "WAITING_APPROVAL",
            RunStatus::Paused => "PAUSED",
            RunStatus::Error => "ERROR",
            RunStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }

    /// Whether the state machine allows `self -> to`. Staying put is allowed
    /// for every non-terminal state.
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        use RunStatus::*;
        if *self == to {
            return !self.is_terminal();
        }
        match self {
            Idle => to == Planning,
            Planning | Running => matches!(
                to,
                Running | WaitingTool | WaitingApproval | Paused | Error | Completed
            ),
            WaitingTool | WaitingApproval => matches!(to, Running | Paused | Error),
            Paused => matches!(to, Running | Error),
            Completed | Error => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = GateError;

    /// Case-insensitive; accepts the service's `AWAITING_APPROVAL` spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "IDLE" => Ok(RunStatus::Idle),
            "PLANNING" => Ok(RunStatus::Planning),
            "RUNNING" => Ok(RunStatus::Running),
            "WAITING_TOOL" => Ok(RunStatus::WaitingTool),
            "WAITING_APPROVAL" | "AWAITING_APPROVAL" => Ok(RunStatus::WaitingApproval),
            "PAUSED" => Ok(RunStatus::Paused),
            "ERROR" => Ok(RunStatus::Error),
            "COMPLETED" => Ok(RunStatus::Completed),
            other => Err(GateError::InvalidState(format!(
                "unknown run status '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub run_id: String,
    pub session_id: String,
    pub status: RunStatus,
    pub prompt: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Returned by `start_loop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub session_id: String,
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub total_decisions: usize,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub pending_approvals: usize,
    pub checkpoints: usize,
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Models send numeric or string ids; both are kept as strings.
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Pending,
        }
    }
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

/// Task list of a run plus the active-task pointer.
///
/// The pointer is either `None` or the id of a task whose status is
/// `InProgress`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    tasks: Vec<Task>,
    active_task_id: Option<String>,
}

impl TaskState {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn active_task_id(&self) -> Option<&str> {
        self.active_task_id.as_deref()
    }

    pub fn active(&self) -> Option<&Task> {
        let id = self.active_task_id.as_deref()?;
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count()
    }

    pub fn has_pending(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Pending)
    }

    /// Replace the task set. A task already in progress stays active;
    /// otherwise the first pending task is started.
    pub fn replace(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        self.active_task_id = self
            .tasks
            .iter()
            .find(|t| t.status == TaskStatus::InProgress)
            .map(|t| t.id.clone());
        if self.active_task_id.is_none() {
            self.activate_next();
        }
    }

    /// Complete the active task and start the next pending one. Returns the
    /// id of the newly active task.
    pub fn complete_active(&mut self) -> Option<String> {
        if let Some(id) = self.active_task_id.take() {
            if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
                task.status = TaskStatus::Completed;
            }
        }
        self.activate_next()
    }

    fn activate_next(&mut self) -> Option<String> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.status == TaskStatus::Pending)?;
        task.status = TaskStatus::InProgress;
        self.active_task_id = Some(task.id.clone());
        self.active_task_id.clone()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.active_task_id = None;
    }
}
