//! Human approval requests with single-resolution semantics.
//!
//! Each request is backed by a `watch` channel carrying its status and a
//! timer task. Whoever removes the request from the live map first (an
//! external approve/reject call, the timer, or a cancellation) decides the
//! outcome; every later attempt finds nothing to resolve and is a no-op.
//! Resolving through any path other than the timer aborts the timer.
//!
//! A caller that must do slow work before committing (telling a remote
//! service, say) takes an [`ApprovalClaim`] first. The claimed request is out
//! of reach of every other path until the claim is committed or released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::utils::prefixed_id;

use super::permission::ActionScope;

/// Life cycle of an approval request. Every state but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// A request for human sign-off on one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub decision_id: String,
    pub method: String,
    pub scope: ActionScope,
    pub target: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub timeout_ms: u64,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Everything needed to open a request.
#[derive(Debug, Clone)]
pub struct ApprovalDraft {
    pub decision_id: String,
    pub method: String,
    pub scope: ActionScope,
    pub target: String,
    pub timeout: Duration,
}

// ============================================================================
// Notification
// ============================================================================

/// Approval life-cycle event delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalEvent {
    Requested(ApprovalRequest),
    Resolved(ApprovalRequest),
}

/// Observer for approval requests. The rendering layer implements this (or
/// consumes a [`ChannelNotifier`]) and answers through
/// [`ApprovalGate::resolve`].
pub trait ApprovalNotifier: Send + Sync {
    fn on_requested(&self, request: &ApprovalRequest);

    fn on_resolved(&self, _request: &ApprovalRequest) {}
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

impl ApprovalNotifier for LogNotifier {
    fn on_requested(&self, request: &ApprovalRequest) {
        info!(
            request_id = %request.id,
            decision_id = %request.decision_id,
            method = %request.method,
            "Approval requested: {}",
            request.description
        );
    }

    fn on_resolved(&self, request: &ApprovalRequest) {
        info!(
            request_id = %request.id,
            decision_id = %request.decision_id,
            status = %request.status,
            "Approval resolved"
        );
    }
}

/// Notifier that forwards events onto an unbounded channel.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ApprovalEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ApprovalNotifier for ChannelNotifier {
    fn on_requested(&self, request: &ApprovalRequest) {
        if self.tx.send(ApprovalEvent::Requested(request.clone())).is_err() {
            debug!(request_id = %request.id, "Approval listener gone");
        }
    }

    fn on_resolved(&self, request: &ApprovalRequest) {
        if self.tx.send(ApprovalEvent::Resolved(request.clone())).is_err() {
            debug!(request_id = %request.id, "Approval listener gone");
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

struct LiveRequest {
    request: ApprovalRequest,
    tx: watch::Sender<ApprovalStatus>,
    timer: Option<AbortHandle>,
    deadline: Instant,
}

#[derive(Default)]
struct GateState {
    live: HashMap<String, LiveRequest>,
    by_decision: HashMap<String, String>,
    granted: HashSet<String>,
}

impl GateState {
    fn take(&mut self, request_id: &str) -> Option<LiveRequest> {
        let live = self.live.remove(request_id)?;
        self.by_decision.remove(&live.request.decision_id);
        Some(live)
    }
}

struct GateInner {
    state: Mutex<GateState>,
    notifier: Arc<dyn ApprovalNotifier>,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registry of live approval requests. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ApprovalGate {
    inner: Arc<GateInner>,
}

impl ApprovalGate {
    pub fn new(notifier: Arc<dyn ApprovalNotifier>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
                notifier,
            }),
        }
    }

    /// Open a request for `draft.decision_id`, or join the live one.
    ///
    /// Must be called from within a Tokio runtime: the timeout runs as a
    /// spawned task.
    pub fn request(&self, draft: ApprovalDraft) -> ApprovalTicket {
        let mut state = self.inner.lock();

        if let Some(existing) = state
            .by_decision
            .get(&draft.decision_id)
            .and_then(|id| state.live.get(id))
        {
            debug!(decision_id = %draft.decision_id, "Joining live approval request");
            return ApprovalTicket {
                request_id: existing.request.id.clone(),
                decision_id: draft.decision_id,
                rx: existing.tx.subscribe(),
            };
        }

        let request = ApprovalRequest {
            id: prefixed_id("approval"),
            description: format!(
                "execute {} ({}) on {}",
                draft.method, draft.scope, draft.target
            ),
            decision_id: draft.decision_id.clone(),
            method: draft.method,
            scope: draft.scope,
            target: draft.target,
            timestamp: Utc::now(),
            timeout_ms: draft.timeout.as_millis() as u64,
            status: ApprovalStatus::Pending,
            reason: None,
        };
        let (tx, rx) = watch::channel(ApprovalStatus::Pending);
        let deadline = Instant::now() + draft.timeout;
        let timer = spawn_timeout(Arc::downgrade(&self.inner), request.id.clone(), deadline);

        state
            .by_decision
            .insert(request.decision_id.clone(), request.id.clone());
        state.live.insert(
            request.id.clone(),
            LiveRequest {
                request: request.clone(),
                tx,
                timer,
                deadline,
            },
        );
        drop(state);

        log_audit_event(
            AuditCategory::ApprovalRequested,
            AuditSeverity::Info,
            "approval_requested",
            &request.description,
            false,
        );
        self.inner.notifier.on_requested(&request);

        ApprovalTicket {
            request_id: request.id,
            decision_id: draft.decision_id,
            rx,
        }
    }

    /// Resolve a live request. Returns `false` when the id is unknown, was
    /// already resolved, or `status` is `Pending`.
    pub fn resolve(&self, request_id: &str, status: ApprovalStatus, reason: Option<&str>) -> bool {
        if !status.is_terminal() {
            return false;
        }
        self.claim(request_id)
            .is_some_and(|claim| claim.commit(status, reason))
    }

    /// Resolve the live request belonging to `decision_id`.
    pub fn resolve_decision(
        &self,
        decision_id: &str,
        status: ApprovalStatus,
        reason: Option<&str>,
    ) -> bool {
        if !status.is_terminal() {
            return false;
        }
        self.claim_decision(decision_id)
            .is_some_and(|claim| claim.commit(status, reason))
    }

    /// Take a live request out of the gate without resolving it yet.
    /// `None` when the id is unknown or another path got there first.
    pub fn claim(&self, request_id: &str) -> Option<ApprovalClaim> {
        let live = self.inner.lock().take(request_id)?;
        Some(ApprovalClaim {
            gate: self.clone(),
            live: Some(live),
        })
    }

    /// [`Self::claim`] by decision id.
    pub fn claim_decision(&self, decision_id: &str) -> Option<ApprovalClaim> {
        let live = {
            let mut state = self.inner.lock();
            let request_id = state.by_decision.get(decision_id)?.clone();
            state.take(&request_id)?
        };
        Some(ApprovalClaim {
            gate: self.clone(),
            live: Some(live),
        })
    }

    fn finish(&self, live: LiveRequest, status: ApprovalStatus, reason: Option<&str>) {
        let LiveRequest {
            mut request,
            tx,
            timer,
            ..
        } = live;
        request.status = status;
        request.reason = reason.map(String::from);

        if status == ApprovalStatus::Approved {
            self.inner
                .lock()
                .granted
                .insert(request.decision_id.clone());
        }
        if status != ApprovalStatus::Timeout {
            if let Some(timer) = timer {
                timer.abort();
            }
        }
        tx.send_replace(status);

        let (category, severity) = match status {
            ApprovalStatus::Timeout => (AuditCategory::ApprovalTimeout, AuditSeverity::Warning),
            _ => (AuditCategory::ApprovalResolved, AuditSeverity::Info),
        };
        log_audit_event(
            category,
            severity,
            &format!("approval_{}", status),
            &format!("{} ({})", request.description, request.decision_id),
            status != ApprovalStatus::Approved,
        );
        self.inner.notifier.on_resolved(&request);
    }

    /// Put a claimed request back with a fresh timer for what is left of
    /// its window. An expired window fires at once.
    fn restore(&self, mut live: LiveRequest) {
        if let Some(timer) = live.timer.take() {
            timer.abort();
        }
        live.timer = spawn_timeout(
            Arc::downgrade(&self.inner),
            live.request.id.clone(),
            live.deadline,
        );
        debug!(request_id = %live.request.id, "Approval claim released");

        let mut state = self.inner.lock();
        state
            .by_decision
            .entry(live.request.decision_id.clone())
            .or_insert_with(|| live.request.id.clone());
        state.live.insert(live.request.id.clone(), live);
    }

    /// Reject every live request. Returns how many were resolved.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.inner.lock().live.keys().cloned().collect();
        ids.iter()
            .filter(|id| self.resolve(id, ApprovalStatus::Rejected, Some(reason)))
            .count()
    }

    /// Live requests, oldest first.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut pending: Vec<ApprovalRequest> = self
            .inner
            .lock()
            .live
            .values()
            .map(|l| l.request.clone())
            .collect();
        pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        pending
    }

    pub fn pending_for_decision(&self, decision_id: &str) -> Option<ApprovalRequest> {
        let state = self.inner.lock();
        state
            .by_decision
            .get(decision_id)
            .and_then(|id| state.live.get(id))
            .map(|l| l.request.clone())
    }

    /// Whether `decision_id` has been approved at some point.
    pub fn is_granted(&self, decision_id: &str) -> bool {
        self.inner.lock().granted.contains(decision_id)
    }

    /// Forget every recorded grant.
    pub fn clear_grants(&self) {
        self.inner.lock().granted.clear();
    }
}

fn spawn_timeout(
    inner: Weak<GateInner>,
    request_id: String,
    deadline: Instant,
) -> Option<AbortHandle> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!(request_id = %request_id, "No runtime, approval request has no timer");
        return None;
    };
    let task = runtime.spawn(async move {
        tokio::time::sleep_until(deadline).await;
        if let Some(inner) = inner.upgrade() {
            let gate = ApprovalGate { inner };
            if gate.resolve(
                &request_id,
                ApprovalStatus::Timeout,
                Some("approval timed out"),
            ) {
                debug!(request_id = %request_id, "Approval request timed out");
            }
        }
    });
    Some(task.abort_handle())
}

// ============================================================================
// Claim
// ============================================================================

/// A live request taken out of its gate and not yet resolved.
///
/// Dropping the claim without committing puts the request back, keeping its
/// original deadline.
pub struct ApprovalClaim {
    gate: ApprovalGate,
    live: Option<LiveRequest>,
}

impl ApprovalClaim {
    /// Resolve the claimed request. A `Pending` status resolves nothing and
    /// releases the claim.
    pub fn commit(mut self, status: ApprovalStatus, reason: Option<&str>) -> bool {
        if !status.is_terminal() {
            return false;
        }
        match self.live.take() {
            Some(live) => {
                self.gate.finish(live, status, reason);
                true
            }
            None => false,
        }
    }

    /// Hand the request back to the gate unresolved.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ApprovalClaim {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            self.gate.restore(live);
        }
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Handle on one request's eventual outcome.
pub struct ApprovalTicket {
    request_id: String,
    decision_id: String,
    rx: watch::Receiver<ApprovalStatus>,
}

impl ApprovalTicket {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn decision_id(&self) -> &str {
        &self.decision_id
    }

    /// Wait for the terminal status. A gate dropped before resolving counts
    /// as a rejection.
    pub async fn outcome(mut self) -> ApprovalStatus {
        loop {
            let status = *self.rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if self.rx.changed().await.is_err() {
                let status = *self.rx.borrow();
                return if status.is_terminal() {
                    status
                } else {
                    ApprovalStatus::Rejected
                };
            }
        }
    }
}
