//! Structured audit logging for permission and approval events.
//!
//! Emits `tracing` events with consistent field names so that downstream log
//! aggregators can filter on `audit=true` and query by `category`,
//! `event_type` and `severity`. Every permission denial, approval outcome and
//! blocked target passes through [`log_audit_event`].

use tracing::{error, info, warn};

/// Broad category of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    /// Permission check rejected an action.
    PermissionDenied,
    /// A human approval was requested.
    ApprovalRequested,
    /// A human approval was granted or rejected.
    ApprovalResolved,
    /// An approval expired without an answer.
    ApprovalTimeout,
    /// Target matched the path deny-list.
    PathSecurity,
    /// A validation gate failed.
    ValidationFailure,
    /// Session permission level changed.
    LevelChange,
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission_denied"),
            Self::ApprovalRequested => write!(f, "approval_requested"),
            Self::ApprovalResolved => write!(f, "approval_resolved"),
            Self::ApprovalTimeout => write!(f, "approval_timeout"),
            Self::PathSecurity => write!(f, "path_security"),
            Self::ValidationFailure => write!(f, "validation_failure"),
            Self::LevelChange => write!(f, "level_change"),
        }
    }
}

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    /// Informational: the action was noted.
    Info,
    /// Warning: the action was held back or expired.
    Warning,
    /// Critical: the action was blocked outright.
    Critical,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Emit a structured audit event via `tracing`.
///
/// All audit events carry `audit = true` so log pipelines can filter on them.
pub fn log_audit_event(
    category: AuditCategory,
    severity: AuditSeverity,
    event_type: &str,
    detail: &str,
    blocked: bool,
) {
    match severity {
        AuditSeverity::Info => info!(
            audit = true,
            category = %category,
            severity = %severity,
            event_type = event_type,
            detail = detail,
            blocked = blocked,
            "audit event"
        ),
        AuditSeverity::Warning => warn!(
            audit = true,
            category = %category,
            severity = %severity,
            event_type = event_type,
            detail = detail,
            blocked = blocked,
            "audit event"
        ),
        AuditSeverity::Critical => error!(
            audit = true,
            category = %category,
            severity = %severity,
            event_type = event_type,
            detail = detail,
            blocked = blocked,
            "audit event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_category_display() {
        assert_eq!(
            AuditCategory::PermissionDenied.to_string(),
            "permission_denied"
        );
        assert_eq!(
            AuditCategory::ApprovalTimeout.to_string(),
            "approval_timeout"
        );
        assert_eq!(AuditCategory::PathSecurity.to_string(), "path_security");
        assert_eq!(
            AuditCategory::ValidationFailure.to_string(),
            "validation_failure"
        );
    }

    #[test]
    fn test_audit_severity_display() {
        assert_eq!(AuditSeverity::Info.to_string(), "info");
        assert_eq!(AuditSeverity::Warning.to_string(), "warning");
        assert_eq!(AuditSeverity::Critical.to_string(), "critical");
    }

    #[test]
    fn test_log_audit_event_all_severities() {
        log_audit_event(
            AuditCategory::ApprovalRequested,
            AuditSeverity::Info,
            "approval_requested",
            "write_file on src/main.rs",
            false,
        );
        log_audit_event(
            AuditCategory::ApprovalTimeout,
            AuditSeverity::Warning,
            "approval_timeout",
            "d1 expired after 30000ms",
            true,
        );
        log_audit_event(
            AuditCategory::PathSecurity,
            AuditSeverity::Critical,
            "target_blocked",
            "../etc/passwd",
            true,
        );
    }
}
