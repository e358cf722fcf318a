//! In-process service implementations.
//!
//! Used by the CLI `replay` command and by tests. Failures can be injected
//! with `fail_next` to exercise the controller's error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    ApprovalService, ApprovalSettings, Checkpoint, CheckpointDraft, CheckpointService,
    RemoteApproval, SessionState, SessionStateService,
};
use crate::error::{GateError, Result};

fn injected(flag: &AtomicBool, what: &str) -> Result<()> {
    if flag.swap(false, Ordering::SeqCst) {
        return Err(GateError::Service(format!("{} failed (injected)", what)));
    }
    Ok(())
}

// ============================================================================
// Checkpoints
// ============================================================================

#[derive(Default)]
pub struct MemoryCheckpointService {
    records: Mutex<Vec<(Checkpoint, Vec<String>)>>,
    next_id: AtomicU64,
    fail_next: AtomicBool,
}

impl MemoryCheckpointService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with a service error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All checkpoints across sessions, oldest first.
    pub fn all(&self) -> Vec<Checkpoint> {
        self.records
            .lock()
            .map(|r| r.iter().map(|(cp, _)| cp.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointService for MemoryCheckpointService {
    async fn create(&self, draft: CheckpointDraft) -> Result<Checkpoint> {
        injected(&self.fail_next, "create checkpoint")?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let checkpoint = Checkpoint {
            checkpoint_id: format!("cp-{}", n),
            session_id: draft.session_id,
            checkpoint_type: draft.checkpoint_type,
            message_order: draft.message_order,
            description: Some(draft.description),
            created_at: Some(Utc::now()),
        };
        let files = draft.file_snapshots.into_keys().collect();
        let mut records = self
            .records
            .lock()
            .map_err(|_| GateError::Service("checkpoint store poisoned".into()))?;
        records.push((checkpoint.clone(), files));
        Ok(checkpoint)
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        injected(&self.fail_next, "list checkpoints")?;
        Ok(self
            .all()
            .into_iter()
            .filter(|cp| cp.session_id == session_id)
            .collect())
    }

    async fn jump(&self, checkpoint_id: &str) -> Result<Vec<String>> {
        injected(&self.fail_next, "jump to checkpoint")?;
        let records = self
            .records
            .lock()
            .map_err(|_| GateError::Service("checkpoint store poisoned".into()))?;
        records
            .iter()
            .find(|(cp, _)| cp.checkpoint_id == checkpoint_id)
            .map(|(_, files)| files.clone())
            .ok_or_else(|| GateError::NotFound(format!("checkpoint {}", checkpoint_id)))
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<()> {
        injected(&self.fail_next, "delete checkpoint")?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| GateError::Service("checkpoint store poisoned".into()))?;
        let before = records.len();
        records.retain(|(cp, _)| cp.checkpoint_id != checkpoint_id);
        if records.len() == before {
            return Err(GateError::NotFound(format!("checkpoint {}", checkpoint_id)));
        }
        Ok(())
    }

    async fn export(&self, checkpoint_id: &str) -> Result<String> {
        injected(&self.fail_next, "export checkpoint")?;
        let checkpoint = self
            .all()
            .into_iter()
            .find(|cp| cp.checkpoint_id == checkpoint_id)
            .ok_or_else(|| GateError::NotFound(format!("checkpoint {}", checkpoint_id)))?;
        Ok(serde_json::to_string_pretty(&checkpoint)?)
    }
}

// ============================================================================
// Approvals
// ============================================================================

/// Approval call observed by [`MemoryApprovalService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalCall {
    Approve {
        decision_id: String,
        reason: Option<String>,
    },
    Reject {
        decision_id: String,
        reason: String,
    },
}

#[derive(Default)]
pub struct MemoryApprovalService {
    approvals: Mutex<Vec<RemoteApproval>>,
    calls: Mutex<Vec<ApprovalCall>>,
    settings: Mutex<ApprovalSettings>,
    fail_next: AtomicBool,
}

impl MemoryApprovalService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Register a pending record, as the terminal would when the model
    /// proposes a gated tool call.
    pub fn add_pending(&self, session_id: &str, decision_id: &str, tool_name: &str) {
        if let Ok(mut approvals) = self.approvals.lock() {
            approvals.push(RemoteApproval {
                decision_id: decision_id.to_string(),
                session_id: session_id.to_string(),
                tool_name: tool_name.to_string(),
                tool_params: Default::default(),
                approval_status: "PENDING".to_string(),
                approval_reason: None,
                created_at: Some(Utc::now()),
            });
        }
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<ApprovalCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: ApprovalCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Move a pending record to `status`. Unknown ids are accepted so the
    /// controller can resolve decisions it registered only locally.
    fn settle(&self, decision_id: &str, status: &str, reason: Option<&str>) -> Result<bool> {
        let mut approvals = self
            .approvals
            .lock()
            .map_err(|_| GateError::Service("approval store poisoned".into()))?;
        match approvals.iter_mut().find(|a| a.decision_id == decision_id) {
            Some(record) if record.approval_status != "PENDING" => Ok(false),
            Some(record) => {
                record.approval_status = status.to_string();
                record.approval_reason = reason.map(str::to_string);
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

#[async_trait]
impl ApprovalService for MemoryApprovalService {
    async fn pending(&self, session_id: &str) -> Result<Vec<RemoteApproval>> {
        injected(&self.fail_next, "list pending approvals")?;
        let approvals = self
            .approvals
            .lock()
            .map_err(|_| GateError::Service("approval store poisoned".into()))?;
        Ok(approvals
            .iter()
            .filter(|a| a.session_id == session_id && a.approval_status == "PENDING")
            .cloned()
            .collect())
    }

    async fn approve(&self, decision_id: &str, reason: Option<&str>) -> Result<bool> {
        self.record(ApprovalCall::Approve {
            decision_id: decision_id.to_string(),
            reason: reason.map(str::to_string),
        });
        injected(&self.fail_next, "approve")?;
        self.settle(decision_id, "APPROVED", reason)
    }

    async fn reject(&self, decision_id: &str, reason: &str) -> Result<bool> {
        self.record(ApprovalCall::Reject {
            decision_id: decision_id.to_string(),
            reason: reason.to_string(),
        });
        injected(&self.fail_next, "reject")?;
        self.settle(decision_id, "REJECTED", Some(reason))
    }

    async fn settings(&self) -> Result<ApprovalSettings> {
        injected(&self.fail_next, "get approval settings")?;
        self.settings
            .lock()
            .map(|s| s.clone())
            .map_err(|_| GateError::Service("settings store poisoned".into()))
    }

    async fn update_settings(&self, settings: &ApprovalSettings) -> Result<()> {
        injected(&self.fail_next, "update approval settings")?;
        let mut current = self
            .settings
            .lock()
            .map_err(|_| GateError::Service("settings store poisoned".into()))?;
        *current = settings.clone();
        Ok(())
    }

    async fn approve_all(&self, session_id: &str) -> Result<usize> {
        injected(&self.fail_next, "approve all")?;
        let mut approvals = self
            .approvals
            .lock()
            .map_err(|_| GateError::Service("approval store poisoned".into()))?;
        let mut count = 0;
        for record in approvals
            .iter_mut()
            .filter(|a| a.session_id == session_id && a.approval_status == "PENDING")
        {
            record.approval_status = "APPROVED".to_string();
            count += 1;
        }
        Ok(count)
    }
}

// ============================================================================
// Session state
// ============================================================================

#[derive(Default)]
pub struct MemorySessionStateService {
    states: Mutex<HashMap<String, SessionState>>,
}

impl MemorySessionStateService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the remote view of a session.
    pub fn set(&self, state: SessionState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(state.session_id.clone(), state);
        }
    }
}

#[async_trait]
impl SessionStateService for MemorySessionStateService {
    async fn get(&self, session_id: &str) -> Result<SessionState> {
        let states = self
            .states
            .lock()
            .map_err(|_| GateError::Service("state store poisoned".into()))?;
        states
            .get(session_id)
            .cloned()
            .ok_or_else(|| GateError::NotFound(format!("session {}", session_id)))
    }

    async fn interrupt(&self, session_id: &str) -> Result<bool> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| GateError::Service("state store poisoned".into()))?;
        let state = states
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState {
                session_id: session_id.to_string(),
                status: "RUNNING".to_string(),
                current_loop_id: None,
                interrupted: false,
            });
        state.interrupted = true;
        Ok(true)
    }

    async fn clear_interrupt(&self, session_id: &str) -> Result<()> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| GateError::Service("state store poisoned".into()))?;
        if let Some(state) = states.get_mut(session_id) {
            state.interrupted = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{CheckpointKind, FileSnapshot};
    use std::collections::BTreeMap;

    fn draft(session: &str, order: usize) -> CheckpointDraft {
        let mut files = BTreeMap::new();
        files.insert("src/main.rs".to_string(), FileSnapshot::default());
        CheckpointDraft {
            session_id: session.to_string(),
            message_order: order,
            checkpoint_type: CheckpointKind::Manual,
            description: "manual".to_string(),
            file_snapshots: files,
        }
    }

    #[tokio::test]
    async fn test_checkpoint_lifecycle() {
        let svc = MemoryCheckpointService::new();
        let a = svc.create(draft("s1", 0)).await.unwrap();
        svc.create(draft("s2", 3)).await.unwrap();
        assert_eq!(svc.list("s1").await.unwrap().len(), 1);

        let restored = svc.jump(&a.checkpoint_id).await.unwrap();
        assert_eq!(restored, vec!["src/main.rs".to_string()]);
        assert!(svc.export(&a.checkpoint_id).await.unwrap().contains("cp-1"));

        svc.delete(&a.checkpoint_id).await.unwrap();
        assert!(matches!(
            svc.jump(&a.checkpoint_id).await,
            Err(GateError::NotFound(_))
        ));
        assert_eq!(svc.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let svc = MemoryCheckpointService::new();
        svc.fail_next();
        assert!(svc.create(draft("s1", 0)).await.unwrap_err().is_service_failure());
        assert!(svc.create(draft("s1", 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_approval_settles_once() {
        let svc = MemoryApprovalService::new();
        svc.add_pending("s1", "d1", "write_file");
        assert_eq!(svc.pending("s1").await.unwrap().len(), 1);

        assert!(svc.approve("d1", Some("looks fine")).await.unwrap());
        assert!(!svc.reject("d1", "too late").await.unwrap());
        assert!(svc.pending("s1").await.unwrap().is_empty());
        assert_eq!(svc.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_approve_all_counts_session_only() {
        let svc = MemoryApprovalService::new();
        svc.add_pending("s1", "d1", "write_file");
        svc.add_pending("s1", "d2", "run_command");
        svc.add_pending("s2", "d3", "write_file");
        assert_eq!(svc.approve_all("s1").await.unwrap(), 2);
        assert_eq!(svc.pending("s2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_interrupt_flag() {
        let svc = MemorySessionStateService::new();
        assert!(svc.interrupt("s1").await.unwrap());
        assert!(svc.get("s1").await.unwrap().interrupted);
        svc.clear_interrupt("s1").await.unwrap();
        assert!(!svc.get("s1").await.unwrap().interrupted);
        assert!(svc.get("missing").await.is_err());
    }
}
