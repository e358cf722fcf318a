//! Agent loop controller.
//!
//! One controller drives one session. Every mutating call takes the run lock,
//! so decisions for a run are processed strictly one at a time. The only
//! suspension point is a gated tool call: `process_decision` answers
//! `WAIT_APPROVAL` immediately and the run resumes once the approval request
//! resolves, whether through `approve_tool`/`reject_tool`, the permission
//! authority, or the window closing.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use super::compaction::{CompactionResult, ContextCompactor, HistoryItem, HistoryKind};
use super::decision::{Decision, DecisionKind, LoopAction};
use super::types::{AgentRun, LoopStats, RunInfo, RunStatus, TaskState};
use crate::config::{CompactionConfig, Config};
use crate::error::{GateError, Result};
use crate::security::{
    ActionScope, ApprovalDraft, ApprovalRequest, ApprovalStatus, ApprovalTicket,
    AutoApprovalPolicy, PermissionAuthority, PermissionLevel,
};
use crate::services::{
    ApprovalService, ApprovalSettings, Checkpoint, CheckpointDraft, CheckpointKind,
    CheckpointService, MemoryApprovalService, MemoryCheckpointService, MemorySessionStateService,
    RemoteApproval, SessionStateService, TerminalClient,
};
use crate::utils::{prefixed_id, preview, unix_millis};
use crate::validation::{
    ActionContext, MessageMeta, ToolAction, ValidationContext, ValidationPipeline,
    ValidationRequest,
};

/// Reason recorded when an approval window closes without an answer.
pub const APPROVAL_TIMEOUT_REASON: &str = "approval timed out";

/// Reason recorded when a request is rejected or cancelled outside the loop.
pub const EXTERNAL_REJECT_REASON: &str = "approval rejected";

/// External services a controller talks to.
#[derive(Clone)]
pub struct LoopServices {
    pub checkpoints: Arc<dyn CheckpointService>,
    pub approvals: Arc<dyn ApprovalService>,
    pub state: Arc<dyn SessionStateService>,
}

impl LoopServices {
    /// All three services backed by one terminal API client.
    pub fn remote(client: TerminalClient) -> Self {
        let client = Arc::new(client);
        Self {
            checkpoints: client.clone(),
            approvals: client.clone(),
            state: client,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            checkpoints: Arc::new(MemoryCheckpointService::new()),
            approvals: Arc::new(MemoryApprovalService::new()),
            state: Arc::new(MemorySessionStateService::new()),
        }
    }
}

/// Tool call that was accepted and is waiting for approval or execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub decision_id: String,
    pub tool: String,
    pub params: Map<String, Value>,
    pub scope: ActionScope,
    pub target: String,
}

impl ToolCall {
    fn from_decision(decision: &Decision) -> Option<Self> {
        let DecisionKind::ToolCall {
            action,
            params,
            scope,
            target,
        } = &decision.kind
        else {
            return None;
        };

        let target = target.clone().or_else(|| {
            ["path", "target", "command"]
                .iter()
                .find_map(|key| params.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        });

        Some(Self {
            decision_id: decision.decision_id.clone(),
            tool: action.clone(),
            params: params.clone(),
            scope: scope.unwrap_or_else(|| infer_scope(action)),
            target: target.unwrap_or_default(),
        })
    }
}

/// Scope of a tool that did not declare one.
fn infer_scope(tool: &str) -> ActionScope {
    let tool = tool.to_ascii_lowercase();
    if ["read", "search", "list", "get"]
        .iter()
        .any(|p| tool.starts_with(p))
    {
        ActionScope::Read
    } else if ["command", "exec", "run", "shell"]
        .iter()
        .any(|p| tool.contains(p))
    {
        ActionScope::Execute
    } else {
        ActionScope::Write
    }
}

// ============================================================================
// State
// ============================================================================

struct LoopState {
    run: Option<AgentRun>,
    history: Vec<Decision>,
    seen: HashSet<String>,
    tasks: TaskState,
    current_tool_call: Option<ToolCall>,
    /// Decision ids waiting for approval, oldest first.
    pending: Vec<String>,
    checkpoints: Vec<Checkpoint>,
    remote_approvals: Vec<RemoteApproval>,
    auto_approval: AutoApprovalPolicy,
    compactor: ContextCompactor,
    context: Vec<HistoryItem>,
    interrupted: bool,
}

impl LoopState {
    fn status(&self) -> RunStatus {
        self.run.as_ref().map(|r| r.status).unwrap_or(RunStatus::Idle)
    }

    fn run_id(&self) -> Option<&str> {
        self.run.as_ref().map(|r| r.run_id.as_str())
    }

    fn transition(&mut self, to: RunStatus) -> Result<()> {
        let run = self
            .run
            .as_mut()
            .ok_or_else(|| GateError::InvalidState("no active run".into()))?;
        let from = run.status;
        if !from.can_transition_to(to) {
            return Err(GateError::InvalidState(format!(
                "cannot move from {} to {}",
                from, to
            )));
        }
        if from != to {
            debug!(run_id = %run.run_id, from = %from, to = %to, "Run status changed");
        }
        run.status = to;
        Ok(())
    }

    /// Move to `to` without consulting the state machine (restart, restore).
    fn force_status(&mut self, to: RunStatus) {
        if let Some(run) = self.run.as_mut() {
            debug!(run_id = %run.run_id, from = %run.status, to = %to, "Run status reset");
            run.status = to;
        }
    }

    fn remove_pending(&mut self, decision_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|d| d != decision_id);
        self.pending.len() != before
    }

    fn remember(&mut self, kind: HistoryKind, content: String) {
        self.context
            .push(HistoryItem::new(kind, content, unix_millis()));
    }

    fn stats(&self) -> LoopStats {
        LoopStats {
            run_id: self.run_id().map(str::to_string),
            status: self.status(),
            total_decisions: self.history.len(),
            total_tasks: self.tasks.tasks().len(),
            completed_tasks: self.tasks.completed_count(),
            pending_approvals: self.pending.len(),
            checkpoints: self.checkpoints.len(),
        }
    }
}

struct LoopInner {
    session_id: String,
    default_model: String,
    authority: Arc<PermissionAuthority>,
    pipeline: ValidationPipeline,
    services: LoopServices,
    state: Mutex<LoopState>,
}

// ============================================================================
// Controller
// ============================================================================

/// Drives the agent run of one session. Cheap to clone; clones share the run.
#[derive(Clone)]
pub struct AgentLoopController {
    inner: Arc<LoopInner>,
}

impl AgentLoopController {
    /// Build a controller whose validation pipeline shares `authority`.
    pub fn new(
        session_id: &str,
        config: &Config,
        authority: Arc<PermissionAuthority>,
        services: LoopServices,
    ) -> Result<Self> {
        let pipeline = ValidationPipeline::new(authority, &config.validation)?;
        Self::with_pipeline(session_id, config, pipeline, services)
    }

    /// Build a controller around an existing pipeline and its authority.
    pub fn with_pipeline(
        session_id: &str,
        config: &Config,
        pipeline: ValidationPipeline,
        services: LoopServices,
    ) -> Result<Self> {
        let state = LoopState {
            run: None,
            history: Vec::new(),
            seen: HashSet::new(),
            tasks: TaskState::default(),
            current_tool_call: None,
            pending: Vec::new(),
            checkpoints: Vec::new(),
            remote_approvals: Vec::new(),
            auto_approval: AutoApprovalPolicy::from_config(&config.agent_loop),
            compactor: ContextCompactor::new(config.compaction.clone())?,
            context: Vec::new(),
            interrupted: false,
        };

        Ok(Self {
            inner: Arc::new(LoopInner {
                session_id: session_id.to_string(),
                default_model: config.agent_loop.default_model.clone(),
                authority: pipeline.authority().clone(),
                pipeline,
                services,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn authority(&self) -> &Arc<PermissionAuthority> {
        &self.inner.authority
    }

    // ------------------------------------------------------------------------
    // Run life cycle
    // ------------------------------------------------------------------------

    /// Start a fresh run. Pending approvals of the previous run are rejected.
    pub async fn start_loop(&self, prompt: &str, model: Option<&str>) -> Result<RunInfo> {
        if prompt.trim().is_empty() {
            return Err(GateError::Validation("prompt must not be empty".into()));
        }

        let mut state = self.inner.state.lock().await;
        self.discard_approvals(&mut state, "loop restarted");

        let run = AgentRun {
            run_id: prefixed_id("loop"),
            session_id: self.inner.session_id.clone(),
            status: RunStatus::Planning,
            prompt: prompt.to_string(),
            model: model
                .map(str::to_string)
                .unwrap_or_else(|| self.inner.default_model.clone()),
            created_at: Utc::now(),
        };
        debug!(
            run_id = %run.run_id,
            from = %state.status(),
            to = %RunStatus::Planning,
            "Run status changed"
        );

        let info = RunInfo {
            run_id: run.run_id.clone(),
            session_id: run.session_id.clone(),
            prompt: run.prompt.clone(),
            model: run.model.clone(),
        };

        state.run = Some(run);
        state.history.clear();
        state.seen.clear();
        state.tasks.clear();
        state.current_tool_call = None;
        state.context.clear();
        state.remember(HistoryKind::User, prompt.to_string());

        self.checkpoint(
            &mut state,
            CheckpointKind::LoopStart,
            format!("loop start: {}", preview(prompt, 50)),
        )
        .await;

        crate::log_component!(
            info,
            "loop",
            "Agent loop started",
            run_id = info.run_id.as_str(),
            session = info.session_id.as_str(),
            model = info.model.as_str()
        );
        Ok(info)
    }

    /// Ingest one decision.
    ///
    /// A decision id seen before yields `Ignore` without touching the run.
    /// Decisions the current status does not accept are rejected with
    /// `InvalidState` and are not recorded.
    pub async fn process_decision(&self, decision: Decision) -> Result<LoopAction> {
        let mut state = self.inner.state.lock().await;
        let span = info_span!(
            "decision",
            run_id = %state.run_id().unwrap_or("-"),
            decision_id = %decision.decision_id,
            kind = decision.kind.name(),
        );
        self.ingest(&mut state, decision).instrument(span).await
    }

    async fn ingest(&self, state: &mut LoopState, decision: Decision) -> Result<LoopAction> {
        if state.seen.contains(&decision.decision_id) {
            debug!("Duplicate decision ignored");
            return Ok(LoopAction::Ignore);
        }

        let status = state.status();
        let accepted = match status {
            RunStatus::Idle | RunStatus::Completed | RunStatus::Error => false,
            RunStatus::WaitingApproval => matches!(
                decision.kind,
                DecisionKind::Pause { .. } | DecisionKind::Error { .. }
            ),
            RunStatus::Paused => matches!(decision.kind, DecisionKind::Error { .. }),
            RunStatus::Planning | RunStatus::Running | RunStatus::WaitingTool => true,
        };
        if !accepted {
            return Err(GateError::InvalidState(format!(
                "{} decision not accepted while {}",
                decision.kind.name(),
                status
            )));
        }

        if status == RunStatus::WaitingTool {
            // A new decision means the tool finished.
            state.current_tool_call = None;
            state.transition(RunStatus::Running)?;
        }

        state.seen.insert(decision.decision_id.clone());
        state.history.push(decision.clone());
        state.remember(HistoryKind::Ai, decision.describe());

        match decision.kind {
            DecisionKind::TaskList { tasks } => {
                state.tasks.replace(tasks);
                state.transition(RunStatus::Running)?;
                Ok(LoopAction::Continue)
            }
            DecisionKind::ToolCall { .. } => self.dispatch_tool_call(state, &decision),
            DecisionKind::TaskComplete { .. } => {
                if state.tasks.complete_active().is_some() {
                    state.transition(RunStatus::Running)?;
                    return Ok(LoopAction::Continue);
                }
                state.transition(RunStatus::Completed)?;
                self.checkpoint(state, CheckpointKind::LoopEnd, "loop completed".into())
                    .await;
                info!("Agent loop completed");
                Ok(LoopAction::Complete)
            }
            DecisionKind::Pause { reason } => {
                state.transition(RunStatus::Paused)?;
                let description = match &reason {
                    Some(r) => format!("paused: {}", r),
                    None => "paused".to_string(),
                };
                self.checkpoint(state, CheckpointKind::Pause, description)
                    .await;
                Ok(LoopAction::Pause { reason })
            }
            DecisionKind::Error { message } => {
                state.transition(RunStatus::Error)?;
                warn!(message = %message, "Agent loop failed");
                Ok(LoopAction::Error { message })
            }
        }
    }

    fn dispatch_tool_call(
        &self,
        state: &mut LoopState,
        decision: &Decision,
    ) -> Result<LoopAction> {
        let call = ToolCall::from_decision(decision)
            .ok_or_else(|| GateError::InvalidState("decision is not a tool call".into()))?;

        let Some(timeout) = state
            .auto_approval
            .requires_approval(&call.tool, &self.inner.authority)
        else {
            state.transition(RunStatus::WaitingTool)?;
            let action = LoopAction::Execute {
                decision_id: call.decision_id.clone(),
                tool: call.tool.clone(),
            };
            state.current_tool_call = Some(call);
            return Ok(action);
        };

        let ticket = self.inner.authority.request_approval(ApprovalDraft {
            decision_id: call.decision_id.clone(),
            method: call.tool.clone(),
            scope: call.scope,
            target: call.target.clone(),
            timeout,
        });
        state.transition(RunStatus::WaitingApproval)?;

        let action = LoopAction::WaitApproval {
            decision_id: call.decision_id.clone(),
            request_id: ticket.request_id().to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };
        state.pending.push(call.decision_id.clone());
        state.current_tool_call = Some(call);

        if let Some(run_id) = state.run_id() {
            self.watch_approval(run_id.to_string(), ticket);
        }
        Ok(action)
    }

    /// Report the outcome of the externally executed tool call.
    pub async fn tool_result(&self, decision_id: &str, success: bool) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let tool = match &state.current_tool_call {
            Some(call) if call.decision_id == decision_id => call.tool.clone(),
            _ => {
                return Err(GateError::NotFound(format!(
                    "no tool call in flight for decision {}",
                    decision_id
                )))
            }
        };
        if state.status() == RunStatus::WaitingTool {
            state.transition(RunStatus::Running)?;
        }
        state.current_tool_call = None;
        let outcome = if success { "succeeded" } else { "failed" };
        state.remember(HistoryKind::System, format!("{} {}", tool, outcome));
        Ok(())
    }

    /// Flag the session as interrupted and pause the run. Pending approvals
    /// stay open.
    pub async fn interrupt(&self) -> Result<RunStatus> {
        let mut state = self.inner.state.lock().await;
        if let Err(e) = self
            .inner
            .services
            .state
            .interrupt(&self.inner.session_id)
            .await
        {
            warn!(session = %self.inner.session_id, error = %e, "Failed to flag interrupt");
        }
        state.interrupted = true;

        let status = state.status();
        if status != RunStatus::Paused && status.can_transition_to(RunStatus::Paused) {
            state.transition(RunStatus::Paused)?;
            self.checkpoint(&mut state, CheckpointKind::Interrupt, "interrupted".into())
                .await;
        }
        Ok(state.status())
    }

    /// PAUSED -> RUNNING. Returns `false` (and changes nothing) otherwise.
    pub async fn resume(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.status() != RunStatus::Paused {
            return false;
        }
        state.transition(RunStatus::Running).is_ok()
    }

    /// Drop the run and everything attached to it.
    pub async fn cleanup(&self) {
        let mut state = self.inner.state.lock().await;
        self.discard_approvals(&mut state, "loop cleaned up");
        state.run = None;
        state.history.clear();
        state.seen.clear();
        state.tasks.clear();
        state.current_tool_call = None;
        state.checkpoints.clear();
        state.remote_approvals.clear();
        state.context.clear();
        state.interrupted = false;
        debug!(session = %self.inner.session_id, "Loop state cleaned up");
    }

    // ------------------------------------------------------------------------
    // Approvals
    // ------------------------------------------------------------------------

    /// Approve a pending tool call. `Ok(false)` when nothing was pending for
    /// the decision, the service refused, or the request already resolved.
    pub async fn approve_tool(&self, decision_id: &str, reason: Option<&str>) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        if !self.is_pending(&state, decision_id)? {
            return Ok(false);
        }
        // Hold the request so the timer cannot fire while the service answers.
        let Some(claim) = self.inner.authority.gate().claim_decision(decision_id) else {
            return Ok(false);
        };

        match self.inner.services.approvals.approve(decision_id, reason).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(decision_id, "Approval service declined approve");
                claim.release();
                return Ok(false);
            }
            Err(e) => {
                warn!(decision_id, error = %e, "Approval service call failed");
                claim.release();
                return Ok(false);
            }
        }

        claim.commit(ApprovalStatus::Approved, reason);
        state.remove_pending(decision_id);
        self.settle(&mut state, decision_id, true)?;
        Ok(true)
    }

    /// Reject a pending tool call. Same return contract as [`Self::approve_tool`].
    pub async fn reject_tool(&self, decision_id: &str, reason: &str) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        if !self.is_pending(&state, decision_id)? {
            return Ok(false);
        }
        let Some(claim) = self.inner.authority.gate().claim_decision(decision_id) else {
            return Ok(false);
        };

        match self.inner.services.approvals.reject(decision_id, reason).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(decision_id, "Approval service declined reject");
                claim.release();
                return Ok(false);
            }
            Err(e) => {
                warn!(decision_id, error = %e, "Approval service call failed");
                claim.release();
                return Ok(false);
            }
        }

        claim.commit(ApprovalStatus::Rejected, Some(reason));
        state.remove_pending(decision_id);
        self.settle(&mut state, decision_id, false)?;
        Ok(true)
    }

    /// Approve everything pending for the session.
    pub async fn approve_all(&self) -> Result<usize> {
        let mut state = self.inner.state.lock().await;
        let count = self
            .inner
            .services
            .approvals
            .approve_all(&self.inner.session_id)
            .await
            .map_err(|e| {
                warn!(session = %self.inner.session_id, error = %e, "Approve-all failed");
                e
            })?;

        for decision_id in std::mem::take(&mut state.pending) {
            self.inner.authority.gate().resolve_decision(
                &decision_id,
                ApprovalStatus::Approved,
                Some("approved in bulk"),
            );
        }
        if state.status() == RunStatus::WaitingApproval {
            state.transition(RunStatus::Running)?;
        }
        Ok(count)
    }

    /// Fetch the service's pending approvals for this session.
    pub async fn load_pending_approvals(&self) -> Result<Vec<RemoteApproval>> {
        let remote = self
            .inner
            .services
            .approvals
            .pending(&self.inner.session_id)
            .await?;
        let mut state = self.inner.state.lock().await;
        state.remote_approvals = remote.clone();
        Ok(remote)
    }

    pub async fn approval_settings(&self) -> Result<ApprovalSettings> {
        self.inner.services.approvals.settings().await
    }

    pub async fn update_approval_settings(&self, settings: &ApprovalSettings) -> Result<()> {
        self.inner.services.approvals.update_settings(settings).await
    }

    pub async fn update_auto_approval_rule(&self, tool: &str, auto_approve: bool) {
        let mut state = self.inner.state.lock().await;
        state.auto_approval.set_rule(tool, auto_approve);
    }

    fn is_pending(&self, state: &LoopState, decision_id: &str) -> Result<bool> {
        if state.run.is_none() {
            return Err(GateError::InvalidState("no active run".into()));
        }
        Ok(state.pending.iter().any(|d| d == decision_id))
    }

    /// Bookkeeping after a loop-owned request resolved.
    fn settle(&self, state: &mut LoopState, decision_id: &str, approved: bool) -> Result<()> {
        if !approved
            && state
                .current_tool_call
                .as_ref()
                .is_some_and(|c| c.decision_id == decision_id)
        {
            state.current_tool_call = None;
        }
        if state.pending.is_empty() && state.status() == RunStatus::WaitingApproval {
            state.transition(RunStatus::Running)?;
        }
        Ok(())
    }

    /// Reject every pending request and forget the grants of the run being
    /// dropped. Decision ids repeat across runs.
    fn discard_approvals(&self, state: &mut LoopState, reason: &str) {
        let gate = self.inner.authority.gate();
        for decision_id in std::mem::take(&mut state.pending) {
            gate.resolve_decision(&decision_id, ApprovalStatus::Rejected, Some(reason));
        }
        gate.clear_grants();
    }

    fn watch_approval(&self, run_id: String, ticket: ApprovalTicket) {
        let inner: Weak<LoopInner> = Arc::downgrade(&self.inner);
        let decision_id = ticket.decision_id().to_string();
        tokio::spawn(async move {
            let status = ticket.outcome().await;
            if let Some(inner) = inner.upgrade() {
                AgentLoopController { inner }
                    .settle_external(&run_id, &decision_id, status)
                    .await;
            }
        });
    }

    /// A loop-owned request resolved without going through `approve_tool`
    /// or `reject_tool`: by the timer, the permission authority, or a
    /// cancellation. Those calls remove the decision from `pending` before
    /// releasing the run lock, so finding it here means nobody settled it.
    async fn settle_external(&self, run_id: &str, decision_id: &str, status: ApprovalStatus) {
        let mut state = self.inner.state.lock().await;
        if state.run_id() != Some(run_id) || !state.remove_pending(decision_id) {
            return;
        }

        let approvals = &self.inner.services.approvals;
        let reported = match status {
            ApprovalStatus::Approved => {
                info!(run_id, decision_id, "Tool call approved outside the loop");
                approvals.approve(decision_id, None).await
            }
            ApprovalStatus::Timeout => {
                warn!(run_id, decision_id, "Tool approval timed out");
                approvals.reject(decision_id, APPROVAL_TIMEOUT_REASON).await
            }
            _ => {
                info!(run_id, decision_id, "Tool call rejected outside the loop");
                approvals.reject(decision_id, EXTERNAL_REJECT_REASON).await
            }
        };
        if let Err(e) = reported {
            warn!(decision_id, status = %status, error = %e, "Failed to report approval outcome");
        }

        let approved = status == ApprovalStatus::Approved;
        if let Err(e) = self.settle(&mut state, decision_id, approved) {
            warn!(decision_id, error = %e, "Could not resume after approval resolved");
        }
    }

    // ------------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------------

    async fn checkpoint(
        &self,
        state: &mut LoopState,
        kind: CheckpointKind,
        description: String,
    ) -> Option<Checkpoint> {
        let draft = CheckpointDraft {
            session_id: self.inner.session_id.clone(),
            message_order: state.history.len(),
            checkpoint_type: kind,
            description,
            file_snapshots: BTreeMap::new(),
        };
        match self.inner.services.checkpoints.create(draft).await {
            Ok(checkpoint) => {
                debug!(
                    checkpoint_id = %checkpoint.checkpoint_id,
                    kind = kind.label(),
                    "Checkpoint created"
                );
                state.checkpoints.push(checkpoint.clone());
                Some(checkpoint)
            }
            Err(e) => {
                warn!(kind = kind.label(), error = %e, "Failed to create checkpoint");
                None
            }
        }
    }

    /// Take a manual checkpoint at the current history position.
    pub async fn create_checkpoint(&self, description: &str) -> Result<Checkpoint> {
        let mut state = self.inner.state.lock().await;
        let draft = CheckpointDraft {
            session_id: self.inner.session_id.clone(),
            message_order: state.history.len(),
            checkpoint_type: CheckpointKind::Manual,
            description: description.to_string(),
            file_snapshots: BTreeMap::new(),
        };
        let checkpoint = self.inner.services.checkpoints.create(draft).await?;
        state.checkpoints.push(checkpoint.clone());
        Ok(checkpoint)
    }

    /// Refresh the cached checkpoint list from the service.
    pub async fn load_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let checkpoints = self
            .inner
            .services
            .checkpoints
            .list(&self.inner.session_id)
            .await?;
        let mut state = self.inner.state.lock().await;
        state.checkpoints = checkpoints.clone();
        Ok(checkpoints)
    }

    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.state.lock().await.checkpoints.clone()
    }

    /// Restore a checkpoint. The run goes back to IDLE, the in-flight tool
    /// call is dropped and pending approvals are cancelled.
    pub async fn jump_to_checkpoint(&self, checkpoint_id: &str) -> Result<Vec<String>> {
        let mut state = self.inner.state.lock().await;
        let restored = self
            .inner
            .services
            .checkpoints
            .jump(checkpoint_id)
            .await
            .map_err(|e| {
                warn!(checkpoint_id, error = %e, "Checkpoint restore failed");
                e
            })?;

        self.discard_approvals(&mut state, "checkpoint restored");
        state.current_tool_call = None;
        state.force_status(RunStatus::Idle);
        info!(checkpoint_id, files = restored.len(), "Checkpoint restored");
        Ok(restored)
    }

    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
        self.inner
            .services
            .checkpoints
            .delete(checkpoint_id)
            .await?;
        let mut state = self.inner.state.lock().await;
        state.checkpoints.retain(|c| c.checkpoint_id != checkpoint_id);
        Ok(())
    }

    pub async fn export_checkpoint(&self, checkpoint_id: &str) -> Result<String> {
        self.inner.services.checkpoints.export(checkpoint_id).await
    }

    // ------------------------------------------------------------------------
    // Session state
    // ------------------------------------------------------------------------

    /// Read the remote session status. An IDLE local run adopts it.
    pub async fn sync_status(&self) -> Result<RunStatus> {
        let remote = self
            .inner
            .services
            .state
            .get(&self.inner.session_id)
            .await?;
        let status: RunStatus = remote.status.parse()?;

        let mut state = self.inner.state.lock().await;
        state.interrupted = remote.interrupted;
        if state.status() == RunStatus::Idle {
            state.force_status(status);
        }
        Ok(status)
    }

    pub async fn clear_interrupt(&self) -> Result<()> {
        self.inner
            .services
            .state
            .clear_interrupt(&self.inner.session_id)
            .await?;
        self.inner.state.lock().await.interrupted = false;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Validation and context
    // ------------------------------------------------------------------------

    /// Run the validation pipeline over a recorded tool call. The decision
    /// id travels as the message id, so an approved decision is not asked
    /// for approval again.
    pub async fn validate_tool_call(
        &self,
        decision_id: &str,
        context: ActionContext,
    ) -> Result<ValidationContext> {
        let call = {
            let state = self.inner.state.lock().await;
            state
                .history
                .iter()
                .find(|d| d.decision_id == decision_id)
                .and_then(ToolCall::from_decision)
                .ok_or_else(|| {
                    GateError::NotFound(format!("tool call for decision {}", decision_id))
                })?
        };

        let level = self
            .inner
            .authority
            .method_tier(&call.tool)
            .unwrap_or(PermissionLevel::Basic);
        let mut action = ToolAction::new(&call.tool, call.scope, level, &call.target);
        action.params = call.params;

        let request = ValidationRequest::new(action)
            .with_context(context)
            .with_meta(MessageMeta {
                session: self.inner.session_id.clone(),
                timestamp: unix_millis(),
                message_id: decision_id.to_string(),
                ..Default::default()
            });
        Ok(self.inner.pipeline.validate(&request).await)
    }

    /// Append a message to the context buffer.
    pub async fn record_message(&self, kind: HistoryKind, content: &str) {
        let mut state = self.inner.state.lock().await;
        state.remember(kind, content.to_string());
    }

    /// Compacted context to send with the next model call.
    pub async fn build_context(&self) -> CompactionResult {
        let state = self.inner.state.lock().await;
        state.compactor.compact(&state.context, unix_millis())
    }

    pub async fn update_compaction_config(&self, config: CompactionConfig) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.compactor.update_config(config)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub async fn status(&self) -> RunStatus {
        self.inner.state.lock().await.status()
    }

    pub async fn run(&self) -> Option<AgentRun> {
        self.inner.state.lock().await.run.clone()
    }

    pub async fn history(&self) -> Vec<Decision> {
        self.inner.state.lock().await.history.clone()
    }

    pub async fn tasks(&self) -> TaskState {
        self.inner.state.lock().await.tasks.clone()
    }

    pub async fn current_tool_call(&self) -> Option<ToolCall> {
        self.inner.state.lock().await.current_tool_call.clone()
    }

    /// Live approval requests owned by this run.
    pub async fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        let state = self.inner.state.lock().await;
        let gate = self.inner.authority.gate();
        state
            .pending
            .iter()
            .filter_map(|d| gate.pending_for_decision(d))
            .collect()
    }

    /// Approval records from the last [`Self::load_pending_approvals`].
    pub async fn remote_approvals(&self) -> Vec<RemoteApproval> {
        self.inner.state.lock().await.remote_approvals.clone()
    }

    pub async fn is_interrupted(&self) -> bool {
        self.inner.state.lock().await.interrupted
    }

    pub async fn stats(&self) -> LoopStats {
        self.inner.state.lock().await.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{Task, TaskStatus};
    use crate::config::PermissionsConfig;
    use crate::services::{MockCheckpointService, SessionState};
    use crate::validation::StaticEnv;
    use std::time::Duration;

    struct Harness {
        controller: AgentLoopController,
        approvals: Arc<MemoryApprovalService>,
        checkpoints: Arc<MemoryCheckpointService>,
        state: Arc<MemorySessionStateService>,
    }

    fn harness() -> Harness {
        let checkpoints = Arc::new(MemoryCheckpointService::new());
        let approvals = Arc::new(MemoryApprovalService::new());
        let state = Arc::new(MemorySessionStateService::new());
        let services = LoopServices {
            checkpoints: checkpoints.clone(),
            approvals: approvals.clone(),
            state: state.clone(),
        };
        Harness {
            controller: controller_with(services),
            approvals,
            checkpoints,
            state,
        }
    }

    fn controller_with(services: LoopServices) -> AgentLoopController {
        let config = Config::default();
        let authority = Arc::new(PermissionAuthority::new(&PermissionsConfig::default()));
        let pipeline = ValidationPipeline::with_env(
            authority,
            &config.validation,
            Arc::new(StaticEnv::new()),
        )
        .unwrap();
        AgentLoopController::with_pipeline("s1", &config, pipeline, services).unwrap()
    }

    async fn running(h: &Harness) {
        h.controller.start_loop("build app", None).await.unwrap();
        h.controller
            .process_decision(Decision::task_list("d0", vec![Task::new("1", "scaffold")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_loop_checkpoints_and_plans() {
        let h = harness();
        let info = h.controller.start_loop("build app", None).await.unwrap();
        assert!(info.run_id.starts_with("loop_"));
        assert_eq!(info.model, "deepseek-chat");
        assert_eq!(h.controller.status().await, RunStatus::Planning);

        let cps = h.checkpoints.all();
        assert_eq!(cps.len(), 1);
        assert_eq!(cps[0].checkpoint_type, CheckpointKind::LoopStart);
        assert_eq!(cps[0].message_order, 0);
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let h = harness();
        assert!(h.controller.start_loop("  ", None).await.is_err());
        assert_eq!(h.controller.status().await, RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_duplicate_decision_ignored() {
        let h = harness();
        running(&h).await;
        let again = h
            .controller
            .process_decision(Decision::task_list("d0", vec![Task::new("9", "other")]))
            .await
            .unwrap();
        assert_eq!(again, LoopAction::Ignore);
        assert_eq!(h.controller.history().await.len(), 1);
        assert_eq!(h.controller.tasks().await.active_task_id(), Some("1"));
    }

    #[tokio::test]
    async fn test_decision_before_start_rejected() {
        let h = harness();
        let err = h
            .controller
            .process_decision(Decision::task_complete("d1"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_autoapproved_tool_executes() {
        let h = harness();
        running(&h).await;
        let action = h
            .controller
            .process_decision(Decision::tool_call("d1", "read_file").with_param("path", "a.rs"))
            .await
            .unwrap();
        assert_eq!(
            action,
            LoopAction::Execute {
                decision_id: "d1".into(),
                tool: "read_file".into()
            }
        );
        assert_eq!(h.controller.status().await, RunStatus::WaitingTool);
        let call = h.controller.current_tool_call().await.unwrap();
        assert_eq!(call.target, "a.rs");
        assert_eq!(call.scope, ActionScope::Read);

        h.controller.tool_result("d1", true).await.unwrap();
        assert_eq!(h.controller.status().await, RunStatus::Running);
        assert!(h.controller.current_tool_call().await.is_none());
    }

    #[tokio::test]
    async fn test_gated_tool_waits_then_resumes_on_approve() {
        let h = harness();
        running(&h).await;
        let action = h
            .controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();
        assert!(matches!(action, LoopAction::WaitApproval { timeout_ms: 30_000, .. }));
        assert_eq!(h.controller.status().await, RunStatus::WaitingApproval);

        let pending = h.controller.pending_approvals().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].decision_id, "d1");

        assert!(h.controller.approve_tool("d1", Some("ok")).await.unwrap());
        assert_eq!(h.controller.status().await, RunStatus::Running);
        assert!(h.controller.pending_approvals().await.is_empty());
        assert!(h.controller.authority().gate().is_granted("d1"));
        // the approved call is still there to execute
        assert!(h.controller.current_tool_call().await.is_some());
        // second approval is a no-op
        assert!(!h.controller.approve_tool("d1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_reject_drops_tool_call() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "execute_command"))
            .await
            .unwrap();
        assert!(h.controller.reject_tool("d1", "no").await.unwrap());
        assert_eq!(h.controller.status().await, RunStatus::Running);
        assert!(h.controller.current_tool_call().await.is_none());
        assert!(matches!(
            h.approvals.calls()[0],
            crate::services::ApprovalCall::Reject { .. }
        ));
    }

    #[tokio::test]
    async fn test_service_failure_keeps_request_pending() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();
        h.approvals.fail_next();
        assert!(!h.controller.approve_tool("d1", None).await.unwrap());
        assert_eq!(h.controller.status().await, RunStatus::WaitingApproval);
        assert_eq!(h.controller.pending_approvals().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_timeout_acts_as_rejection() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30_001)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.controller.status().await, RunStatus::Running);
        assert!(h.controller.current_tool_call().await.is_none());
        assert_eq!(
            h.approvals.calls(),
            vec![crate::services::ApprovalCall::Reject {
                decision_id: "d1".into(),
                reason: APPROVAL_TIMEOUT_REASON.into(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_authority_approval_resumes_run() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();

        let pending = h.controller.authority().pending_approvals();
        assert!(h.controller.authority().approve_request(&pending[0].id, true));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.controller.status().await, RunStatus::Running);
        assert_eq!(h.controller.stats().await.pending_approvals, 0);
        assert!(h.controller.current_tool_call().await.is_some());
        assert_eq!(
            h.approvals.calls(),
            vec![crate::services::ApprovalCall::Approve {
                decision_id: "d1".into(),
                reason: None,
            }]
        );
        assert!(!h.controller.approve_tool("d1", None).await.unwrap());
        let next = h
            .controller
            .process_decision(Decision::task_complete("d2"))
            .await
            .unwrap();
        assert_ne!(next, LoopAction::Ignore);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authority_reset_releases_waiting_run() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "execute_command"))
            .await
            .unwrap();

        h.controller.authority().reset();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.controller.status().await, RunStatus::Running);
        assert!(h.controller.current_tool_call().await.is_none());
        assert_eq!(
            h.approvals.calls(),
            vec![crate::services::ApprovalCall::Reject {
                decision_id: "d1".into(),
                reason: EXTERNAL_REJECT_REASON.into(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_run_does_not_inherit_grants() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();
        assert!(h.controller.approve_tool("d1", None).await.unwrap());
        assert!(h.controller.authority().gate().is_granted("d1"));

        h.controller.cleanup().await;
        running(&h).await;
        assert!(!h.controller.authority().gate().is_granted("d1"));
        let action = h
            .controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();
        assert!(matches!(action, LoopAction::WaitApproval { .. }));

        assert!(h.controller.approve_tool("d1", None).await.unwrap());
        let cp = h.controller.create_checkpoint("after write").await.unwrap();
        h.controller.jump_to_checkpoint(&cp.checkpoint_id).await.unwrap();
        assert!(!h.controller.authority().gate().is_granted("d1"));
    }

    /// Approval service that answers `approve` only after `delay`.
    struct SlowApprovals {
        inner: Arc<MemoryApprovalService>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ApprovalService for SlowApprovals {
        async fn pending(&self, session_id: &str) -> Result<Vec<RemoteApproval>> {
            self.inner.pending(session_id).await
        }

        async fn approve(&self, decision_id: &str, reason: Option<&str>) -> Result<bool> {
            tokio::time::sleep(self.delay).await;
            self.inner.approve(decision_id, reason).await
        }

        async fn reject(&self, decision_id: &str, reason: &str) -> Result<bool> {
            self.inner.reject(decision_id, reason).await
        }

        async fn settings(&self) -> Result<ApprovalSettings> {
            self.inner.settings().await
        }

        async fn update_settings(&self, settings: &ApprovalSettings) -> Result<()> {
            self.inner.update_settings(settings).await
        }

        async fn approve_all(&self, session_id: &str) -> Result<usize> {
            self.inner.approve_all(session_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_closing_during_slow_approve_keeps_approval() {
        let approvals = Arc::new(MemoryApprovalService::new());
        let controller = controller_with(LoopServices {
            checkpoints: Arc::new(MemoryCheckpointService::new()),
            approvals: Arc::new(SlowApprovals {
                inner: approvals.clone(),
                delay: Duration::from_secs(5),
            }),
            state: Arc::new(MemorySessionStateService::new()),
        });
        controller.start_loop("build app", None).await.unwrap();
        controller
            .process_decision(Decision::task_list("d0", vec![Task::new("1", "scaffold")]))
            .await
            .unwrap();
        controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(29_999)).await;
        assert!(controller.approve_tool("d1", Some("ok")).await.unwrap());
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(controller.status().await, RunStatus::Running);
        assert!(controller.current_tool_call().await.is_some());
        assert!(controller.authority().gate().is_granted("d1"));
        assert_eq!(
            approvals.calls(),
            vec![crate::services::ApprovalCall::Approve {
                decision_id: "d1".into(),
                reason: Some("ok".into()),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_approve_keeps_original_window() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        h.approvals.fail_next();
        assert!(!h.controller.approve_tool("d1", None).await.unwrap());
        assert_eq!(h.controller.pending_approvals().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(20_001)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.controller.status().await, RunStatus::Running);
        assert!(h.controller.pending_approvals().await.is_empty());
    }

    #[tokio::test]
    async fn test_waiting_approval_accepts_only_pause_and_error() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();

        let err = h
            .controller
            .process_decision(Decision::task_complete("d2"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidState(_)));
        assert_eq!(h.controller.history().await.len(), 2);

        let action = h
            .controller
            .process_decision(Decision::pause("d3", Some("user away")))
            .await
            .unwrap();
        assert_eq!(
            action,
            LoopAction::Pause {
                reason: Some("user away".into())
            }
        );
        assert_eq!(h.controller.status().await, RunStatus::Paused);
        // approval still live and resolvable; status stays paused
        assert!(h.controller.approve_tool("d1", None).await.unwrap());
        assert_eq!(h.controller.status().await, RunStatus::Paused);
        assert!(h.controller.resume().await);
        assert_eq!(h.controller.status().await, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_task_completion_flow() {
        let h = harness();
        h.controller.start_loop("two things", None).await.unwrap();
        h.controller
            .process_decision(Decision::task_list(
                "d0",
                vec![Task::new("1", "a"), Task::new("2", "b")],
            ))
            .await
            .unwrap();

        let first = h
            .controller
            .process_decision(Decision::task_complete("d1"))
            .await
            .unwrap();
        assert_eq!(first, LoopAction::Continue);
        assert_eq!(h.controller.tasks().await.active_task_id(), Some("2"));

        let second = h
            .controller
            .process_decision(Decision::task_complete("d2"))
            .await
            .unwrap();
        assert_eq!(second, LoopAction::Complete);
        assert_eq!(h.controller.status().await, RunStatus::Completed);
        let tasks = h.controller.tasks().await;
        assert!(tasks.tasks().iter().all(|t| t.status == TaskStatus::Completed));

        let last = h.checkpoints.all().pop().unwrap();
        assert_eq!(last.checkpoint_type, CheckpointKind::LoopEnd);
        assert_eq!(last.message_order, 3);
    }

    #[tokio::test]
    async fn test_error_decision_is_terminal() {
        let h = harness();
        running(&h).await;
        let action = h
            .controller
            .process_decision(Decision::error("d1", "model crashed"))
            .await
            .unwrap();
        assert_eq!(
            action,
            LoopAction::Error {
                message: "model crashed".into()
            }
        );
        assert!(h
            .controller
            .process_decision(Decision::task_complete("d2"))
            .await
            .is_err());
        assert!(!h.controller.resume().await);

        h.controller.start_loop("again", None).await.unwrap();
        assert_eq!(h.controller.status().await, RunStatus::Planning);
        assert!(h.controller.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_keeps_pending_approvals() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();

        assert_eq!(h.controller.interrupt().await.unwrap(), RunStatus::Paused);
        assert!(h.controller.is_interrupted().await);
        assert_eq!(h.controller.pending_approvals().await.len(), 1);
        assert!(h.state.get("s1").await.unwrap().interrupted);
        let last = h.checkpoints.all().pop().unwrap();
        assert_eq!(last.checkpoint_type, CheckpointKind::Interrupt);

        h.controller.clear_interrupt().await.unwrap();
        assert!(!h.controller.is_interrupted().await);
    }

    #[tokio::test]
    async fn test_jump_resets_to_idle_and_cancels_approvals() {
        let h = harness();
        running(&h).await;
        let cp = h.controller.create_checkpoint("before write").await.unwrap();
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();

        let restored = h.controller.jump_to_checkpoint(&cp.checkpoint_id).await.unwrap();
        assert!(restored.is_empty());
        assert_eq!(h.controller.status().await, RunStatus::Idle);
        assert!(h.controller.pending_approvals().await.is_empty());
        assert!(h.controller.current_tool_call().await.is_none());
        assert!(h.controller.authority().gate().pending().is_empty());
    }

    #[tokio::test]
    async fn test_approve_all_resumes() {
        let h = harness();
        running(&h).await;
        h.approvals.add_pending("s1", "d1", "write_file");
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();
        assert_eq!(h.controller.load_pending_approvals().await.unwrap().len(), 1);

        assert_eq!(h.controller.approve_all().await.unwrap(), 1);
        assert_eq!(h.controller.status().await, RunStatus::Running);
        assert!(h.controller.authority().gate().is_granted("d1"));
    }

    #[tokio::test]
    async fn test_auto_approval_rule_update() {
        let h = harness();
        running(&h).await;
        h.controller.update_auto_approval_rule("write_file", true).await;
        let action = h
            .controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();
        assert!(matches!(action, LoopAction::Execute { .. }));
    }

    #[tokio::test]
    async fn test_sync_status_adopts_when_idle() {
        let h = harness();
        h.state.set(SessionState {
            session_id: "s1".into(),
            status: "awaiting_approval".into(),
            current_loop_id: None,
            interrupted: false,
        });
        assert_eq!(
            h.controller.sync_status().await.unwrap(),
            RunStatus::WaitingApproval
        );
        // no local run to adopt into
        assert_eq!(h.controller.status().await, RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_stats_and_cleanup() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(Decision::tool_call("d1", "write_file"))
            .await
            .unwrap();

        let stats = h.controller.stats().await;
        assert_eq!(stats.total_decisions, 2);
        assert_eq!(stats.total_tasks, 1);
        assert_eq!(stats.pending_approvals, 1);
        assert_eq!(stats.checkpoints, 1);

        h.controller.cleanup().await;
        let stats = h.controller.stats().await;
        assert_eq!(stats.run_id, None);
        assert_eq!(stats.status, RunStatus::Idle);
        assert_eq!(stats.pending_approvals, 0);
        assert!(h.controller.authority().gate().pending().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_not_fatal() {
        let mut mock = MockCheckpointService::new();
        mock.expect_create()
            .times(1)
            .returning(|_| Err(GateError::Service("checkpoint store down".into())));
        let services = LoopServices {
            checkpoints: Arc::new(mock),
            approvals: Arc::new(MemoryApprovalService::new()),
            state: Arc::new(MemorySessionStateService::new()),
        };
        let controller = controller_with(services);

        controller.start_loop("build app", None).await.unwrap();
        assert_eq!(controller.status().await, RunStatus::Planning);
        assert!(controller.checkpoints().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_cache_maintenance() {
        let h = harness();
        running(&h).await;
        let cp = h.controller.create_checkpoint("manual").await.unwrap();
        assert_eq!(cp.checkpoint_type, CheckpointKind::Manual);
        assert_eq!(h.controller.load_checkpoints().await.unwrap().len(), 2);
        assert!(h
            .controller
            .export_checkpoint(&cp.checkpoint_id)
            .await
            .unwrap()
            .contains("manual"));
        h.controller.delete_checkpoint(&cp.checkpoint_id).await.unwrap();
        assert_eq!(h.controller.checkpoints().await.len(), 1);
    }

    #[tokio::test]
    async fn test_validate_recorded_tool_call() {
        let h = harness();
        running(&h).await;
        h.controller
            .process_decision(
                Decision::tool_call("d1", "read_file").with_param("path", "../etc/passwd"),
            )
            .await
            .unwrap();
        let ctx = h
            .controller
            .validate_tool_call("d1", ActionContext::default())
            .await
            .unwrap();
        assert!(!ctx.all_passed);
        assert_eq!(
            ctx.failure().unwrap().phase,
            crate::validation::ValidationPhase::OperationExecution
        );

        assert!(h
            .controller
            .validate_tool_call("missing", ActionContext::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_context_is_compacted() {
        let h = harness();
        running(&h).await;
        h.controller
            .record_message(HistoryKind::System, "build failed")
            .await;
        let ctx = h.controller.build_context().await;
        assert!(ctx.summary.starts_with("[user] build app"));
        assert!(ctx.summary.contains("[system] build failed"));
        assert!(ctx.info_retention >= 0.7 && ctx.info_retention <= 0.9);
    }
}
