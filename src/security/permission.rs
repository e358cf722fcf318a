//! Tiered permission authority.
//!
//! Three levels form a lattice `basic < operation < system`. Each level owns an
//! allow-list of methods and scopes; a level also admits everything admitted by
//! the levels below it, so a `system` session may call any `basic` method.
//!
//! ```text
//!   check_permission(method, scope, requested level)
//!        │
//!        ├── method not admitted at requested level ──► MethodNotAllowed
//!        ├── scope not admitted at requested level  ──► ScopeNotAllowed
//!        ├── active session level < requested level ──► LevelTooLow
//!        ▼
//!   approval_requirement(method) ──► None ──► Allowed
//!        │ Some(timeout)
//!        ▼
//!   ApprovalGate::request ──► ticket.outcome() ──► Approved | Rejected | Timeout
//! ```
//!
//! Approval is decided by the tier that owns the method (the lowest level
//! whose own allow-list names it), not by the level the caller asked for nor
//! by the session's active level.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::{LoopConfig, PermissionsConfig};
use crate::error::GateError;
use crate::utils::prefixed_id;

use super::approval::{
    ApprovalDraft, ApprovalGate, ApprovalNotifier, ApprovalRequest, ApprovalStatus, ApprovalTicket,
    LogNotifier,
};

/// Timeout used when a gated level does not configure one.
pub const DEFAULT_APPROVAL_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Levels and scopes
// ============================================================================

/// Permission tier. Ordering follows the lattice: `Basic < Operation < System`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// File reads and environment queries.
    #[default]
    Basic,
    /// Code generation and file modification.
    Operation,
    /// Dependency installs, process control, arbitrary commands.
    System,
}

impl PermissionLevel {
    /// All levels, lowest first.
    pub const ALL: [PermissionLevel; 3] = [
        PermissionLevel::Basic,
        PermissionLevel::Operation,
        PermissionLevel::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Basic => "basic",
            PermissionLevel::Operation => "operation",
            PermissionLevel::System => "system",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(PermissionLevel::Basic),
            "operation" => Ok(PermissionLevel::Operation),
            "system" => Ok(PermissionLevel::System),
            other => Err(GateError::Config(format!(
                "unknown permission level '{}'",
                other
            ))),
        }
    }
}

/// What an action touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    Read,
    Write,
    Execute,
}

impl ActionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionScope::Read => "read",
            ActionScope::Write => "write",
            ActionScope::Execute => "execute",
        }
    }
}

impl fmt::Display for ActionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionScope {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(ActionScope::Read),
            "write" => Ok(ActionScope::Write),
            "execute" => Ok(ActionScope::Execute),
            other => Err(GateError::Config(format!("unknown scope '{}'", other))),
        }
    }
}

// ============================================================================
// Level policy
// ============================================================================

/// What a single tier admits on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelPolicy {
    pub allowed_scopes: Vec<ActionScope>,
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_timeout_ms: Option<u64>,
}

impl LevelPolicy {
    /// Built-in policy for `level`.
    pub fn builtin(level: PermissionLevel) -> Self {
        let (scopes, methods, approval): (&[ActionScope], &[&str], Option<u64>) = match level {
            PermissionLevel::Basic => (
                &[ActionScope::Read],
                &[
                    "read_file",
                    "list_directory",
                    "get_file_info",
                    "search_files",
                    "get_environment",
                ],
                None,
            ),
            PermissionLevel::Operation => (
                &[ActionScope::Read, ActionScope::Write],
                &[
                    "read_file",
                    "write_file",
                    "ensure_file",
                    "delete_file",
                    "rename_file",
                    "create_directory",
                    "generate_code",
                    "refactor_code",
                ],
                Some(30_000),
            ),
            PermissionLevel::System => (
                &[ActionScope::Read, ActionScope::Write, ActionScope::Execute],
                &[
                    "execute_command",
                    "install_dependency",
                    "run_script",
                    "start_process",
                    "stop_process",
                    "modify_config",
                    "git_operation",
                ],
                Some(60_000),
            ),
        };

        Self {
            allowed_scopes: scopes.to_vec(),
            allowed_methods: methods.iter().map(|m| m.to_string()).collect(),
            requires_approval: approval.is_some(),
            approval_timeout_ms: approval,
        }
    }

    /// Approval window for this tier, or `None` when it is not gated.
    pub fn approval_timeout(&self) -> Option<Duration> {
        self.requires_approval.then(|| {
            Duration::from_millis(
                self.approval_timeout_ms
                    .unwrap_or(DEFAULT_APPROVAL_TIMEOUT_MS),
            )
        })
    }
}

// ============================================================================
// Check results
// ============================================================================

/// The specific condition a rejected permission check failed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDenial {
    MethodNotAllowed {
        method: String,
        level: PermissionLevel,
    },
    ScopeNotAllowed {
        scope: ActionScope,
        level: PermissionLevel,
    },
    LevelTooLow {
        active: PermissionLevel,
        requested: PermissionLevel,
    },
}

impl fmt::Display for PermissionDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionDenial::MethodNotAllowed { method, level } => write!(
                f,
                "method '{}' is not in the allow-list of level '{}'",
                method, level
            ),
            PermissionDenial::ScopeNotAllowed { scope, level } => write!(
                f,
                "scope '{}' exceeds what level '{}' allows",
                scope, level
            ),
            PermissionDenial::LevelTooLow { active, requested } => write!(
                f,
                "session level '{}' is below requested level '{}'",
                active, requested
            ),
        }
    }
}

impl From<PermissionDenial> for GateError {
    fn from(denial: PermissionDenial) -> Self {
        GateError::PermissionDenied(denial.to_string())
    }
}

/// Inputs for a combined permission check and approval wait.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Decision the action belongs to. A decision that was already approved
    /// is not asked about again.
    pub decision_id: Option<String>,
    pub method: String,
    pub scope: ActionScope,
    pub level: PermissionLevel,
    pub target: String,
}

/// Outcome of [`PermissionAuthority::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied(PermissionDenial),
    NotApproved(ApprovalStatus),
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Authorization::Allowed)
    }
}

// ============================================================================
// Authority
// ============================================================================

/// Per-session permission authority. Owns the active level and the approval
/// gate; construct one per session (or per test) and share it with `Arc`.
pub struct PermissionAuthority {
    policies: BTreeMap<PermissionLevel, LevelPolicy>,
    level: RwLock<PermissionLevel>,
    gate: ApprovalGate,
}

impl PermissionAuthority {
    /// Build an authority whose approval notifications only go to the log.
    pub fn new(config: &PermissionsConfig) -> Self {
        Self::with_notifier(config, Arc::new(LogNotifier))
    }

    /// Build an authority publishing approval requests to `notifier`.
    pub fn with_notifier(config: &PermissionsConfig, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        let policies = PermissionLevel::ALL
            .iter()
            .map(|level| (*level, config.policy(*level).clone()))
            .collect();

        Self {
            policies,
            level: RwLock::new(config.initial_level()),
            gate: ApprovalGate::new(notifier),
        }
    }

    /// Active session level.
    pub fn level(&self) -> PermissionLevel {
        *self.level.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_level(&self, level: PermissionLevel) {
        let previous = {
            let mut guard = self.level.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *guard, level)
        };
        if previous != level {
            info!(from = %previous, to = %level, "Permission level changed");
            log_audit_event(
                AuditCategory::LevelChange,
                AuditSeverity::Info,
                "level_change",
                &format!("{} -> {}", previous, level),
                false,
            );
        }
    }

    /// Raise the session to `system`.
    pub fn enable_dev_mode(&self) {
        self.set_level(PermissionLevel::System);
    }

    /// Drop back to `basic` and reject every pending approval.
    pub fn reset(&self) {
        self.set_level(PermissionLevel::Basic);
        let cancelled = self.gate.cancel_all("permissions reset");
        if cancelled > 0 {
            debug!(cancelled, "Pending approvals rejected on reset");
        }
        self.gate.clear_grants();
    }

    /// Policy owned by `level` alone (without what lower levels add).
    pub fn policy(&self, level: PermissionLevel) -> &LevelPolicy {
        &self.policies[&level]
    }

    fn admitted_by(&self, level: PermissionLevel) -> impl Iterator<Item = &LevelPolicy> {
        self.policies.range(..=level).map(|(_, policy)| policy)
    }

    /// Methods admitted at `level`, including everything from lower levels.
    pub fn effective_methods(&self, level: PermissionLevel) -> Vec<String> {
        let mut seen = HashSet::new();
        self.admitted_by(level)
            .flat_map(|p| p.allowed_methods.iter())
            .filter(|m| seen.insert(m.as_str()))
            .cloned()
            .collect()
    }

    pub fn allows_method(&self, level: PermissionLevel, method: &str) -> bool {
        self.admitted_by(level)
            .any(|p| p.allowed_methods.iter().any(|m| m == method))
    }

    pub fn allows_scope(&self, level: PermissionLevel, scope: ActionScope) -> bool {
        self.admitted_by(level)
            .any(|p| p.allowed_scopes.contains(&scope))
    }

    /// Lowest level whose own allow-list names `method`.
    pub fn method_tier(&self, method: &str) -> Option<PermissionLevel> {
        self.policies
            .iter()
            .find(|(_, p)| p.allowed_methods.iter().any(|m| m == method))
            .map(|(level, _)| *level)
    }

    /// Approval window required before `method` may run, if any.
    pub fn approval_requirement(&self, method: &str) -> Option<Duration> {
        self.method_tier(method)
            .and_then(|tier| self.policy(tier).approval_timeout())
    }

    /// Fail-closed static check. Never requests approval.
    pub fn check_permission(
        &self,
        method: &str,
        scope: ActionScope,
        level: PermissionLevel,
        target: &str,
    ) -> std::result::Result<(), PermissionDenial> {
        let active = self.level();
        let verdict = if !self.allows_method(level, method) {
            Err(PermissionDenial::MethodNotAllowed {
                method: method.to_string(),
                level,
            })
        } else if !self.allows_scope(level, scope) {
            Err(PermissionDenial::ScopeNotAllowed { scope, level })
        } else if active < level {
            Err(PermissionDenial::LevelTooLow {
                active,
                requested: level,
            })
        } else {
            Ok(())
        };

        if let Err(denial) = &verdict {
            log_audit_event(
                AuditCategory::PermissionDenied,
                AuditSeverity::Warning,
                "permission_denied",
                &format!("{} on '{}': {}", method, target, denial),
                true,
            );
        }
        verdict
    }

    /// Open (or join) the approval request for a decision.
    pub fn request_approval(&self, draft: ApprovalDraft) -> ApprovalTicket {
        self.gate.request(draft)
    }

    /// Sole external resolution path. No-op for unknown or resolved ids.
    pub fn approve_request(&self, request_id: &str, approved: bool) -> bool {
        let status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.gate.resolve(request_id, status, None)
    }

    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.gate.pending()
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    /// Permission check followed, when the method's tier is gated, by a wait
    /// for human approval.
    pub async fn authorize(&self, request: &AuthorizationRequest) -> Authorization {
        if let Err(denial) = self.check_permission(
            &request.method,
            request.scope,
            request.level,
            &request.target,
        ) {
            return Authorization::Denied(denial);
        }

        let Some(timeout) = self.approval_requirement(&request.method) else {
            return Authorization::Allowed;
        };

        if let Some(decision_id) = &request.decision_id {
            if self.gate.is_granted(decision_id) {
                return Authorization::Allowed;
            }
        }

        let ticket = self.gate.request(ApprovalDraft {
            decision_id: request
                .decision_id
                .clone()
                .unwrap_or_else(|| prefixed_id("decision")),
            method: request.method.clone(),
            scope: request.scope,
            target: request.target.clone(),
            timeout,
        });

        match ticket.outcome().await {
            ApprovalStatus::Approved => Authorization::Allowed,
            status => Authorization::NotApproved(status),
        }
    }
}

// ============================================================================
// Autoapproval
// ============================================================================

/// Tool -> autoapprove rules layered over the permission tiers.
///
/// An explicit rule wins. Without one, dangerous tools and tools whose tier is
/// gated need approval; everything else runs directly.
#[derive(Debug, Clone)]
pub struct AutoApprovalPolicy {
    rules: BTreeMap<String, bool>,
    dangerous: HashSet<String>,
    default_timeout: Duration,
}

impl AutoApprovalPolicy {
    pub fn from_config(config: &LoopConfig) -> Self {
        Self {
            rules: config.auto_approval.clone(),
            dangerous: config.dangerous_tools.iter().cloned().collect(),
            default_timeout: Duration::from_millis(config.default_approval_timeout_ms),
        }
    }

    pub fn set_rule(&mut self, tool: &str, auto_approve: bool) {
        self.rules.insert(tool.to_string(), auto_approve);
    }

    pub fn rule(&self, tool: &str) -> Option<bool> {
        self.rules.get(tool).copied()
    }

    pub fn rules(&self) -> &BTreeMap<String, bool> {
        &self.rules
    }

    pub fn is_dangerous(&self, tool: &str) -> bool {
        self.dangerous.contains(tool)
    }

    /// Approval window `tool` must wait for, or `None` to run it directly.
    pub fn requires_approval(
        &self,
        tool: &str,
        authority: &PermissionAuthority,
    ) -> Option<Duration> {
        let tier_timeout = authority.approval_requirement(tool);
        let gated = match self.rule(tool) {
            Some(auto_approve) => !auto_approve,
            None => self.is_dangerous(tool) || tier_timeout.is_some(),
        };
        gated.then(|| tier_timeout.unwrap_or(self.default_timeout))
    }
}
