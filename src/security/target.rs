//! Target deny-list for the execution precheck.
//!
//! Targets are matched against a list of regexes (parent-directory traversal
//! and OS-sensitive directories by default). Patterns are compiled once when
//! the policy is built.

use regex::Regex;

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::DEFAULT_DENIED_TARGETS;
use crate::error::{GateError, Result};

/// Compiled target deny-list.
#[derive(Debug, Clone)]
pub struct TargetPolicy {
    denied: Vec<Regex>,
}

impl Default for TargetPolicy {
    fn default() -> Self {
        Self {
            denied: DEFAULT_DENIED_TARGETS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

impl TargetPolicy {
    /// Create a policy with the default deny-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a policy from configured patterns.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let denied = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    GateError::Config(format!("invalid target pattern '{}': {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { denied })
    }

    /// Add a pattern to the deny-list.
    pub fn deny_pattern(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| GateError::Config(format!("invalid target pattern '{}': {}", pattern, e)))?;
        self.denied.push(re);
        Ok(self)
    }

    /// First deny pattern matching `target`, if any.
    pub fn matching_pattern(&self, target: &str) -> Option<&str> {
        self.denied
            .iter()
            .find(|re| re.is_match(target))
            .map(|re| re.as_str())
    }

    /// Check a target.
    ///
    /// Returns `Ok(())` when the target is acceptable, or
    /// `Err(Validation)` naming the matched pattern.
    pub fn validate_target(&self, target: &str) -> Result<()> {
        if target.trim().is_empty() {
            return Err(GateError::Validation("target path is empty".to_string()));
        }
        if let Some(pattern) = self.matching_pattern(target) {
            log_audit_event(
                AuditCategory::PathSecurity,
                AuditSeverity::Critical,
                "target_blocked",
                &format!("{} matched {}", target, pattern),
                true,
            );
            return Err(GateError::Validation(format!(
                "invalid target path '{}': matches denied pattern '{}'",
                target, pattern
            )));
        }
        Ok(())
    }
}
