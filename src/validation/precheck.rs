//! Gate 4: execution precheck.
//!
//! Rejects targets on the deny-list and calls missing the parameters their
//! method requires. A parameter counts as present when its key exists.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::ValidationConfig;
use crate::error::{GateError, Result};
use crate::security::TargetPolicy;

use super::request::ToolAction;

pub struct ExecutionPrecheck {
    targets: TargetPolicy,
    required_params: BTreeMap<String, Vec<String>>,
}

impl ExecutionPrecheck {
    pub fn new(config: &ValidationConfig) -> Result<Self> {
        Ok(Self {
            targets: TargetPolicy::from_patterns(&config.denied_targets)?,
            required_params: config.required_params.clone(),
        })
    }

    /// Required keys absent from `params`.
    pub fn missing_params(&self, method: &str, params: &Map<String, Value>) -> Vec<String> {
        self.required_params
            .get(method)
            .map(|required| {
                required
                    .iter()
                    .filter(|key| !params.contains_key(key.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run the gate. `Err` carries the failure reason.
    pub fn check(&self, action: &ToolAction) -> std::result::Result<(), String> {
        if !action.target.is_empty() {
            self.targets
                .validate_target(&action.target)
                .map_err(|e| match e {
                    GateError::Validation(msg) => msg,
                    other => other.to_string(),
                })?;
        }

        let missing = self.missing_params(&action.method, &action.params);
        if !missing.is_empty() {
            return Err(format!(
                "incomplete parameters for {}: missing {}",
                action.method,
                missing.join(", ")
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{ActionScope, PermissionLevel};

    fn precheck() -> ExecutionPrecheck {
        ExecutionPrecheck::new(&ValidationConfig::default()).unwrap()
    }

    #[test]
    fn test_write_needs_path_and_content() {
        let action = ToolAction::new(
            "write_file",
            ActionScope::Write,
            PermissionLevel::Operation,
            "src/a.rs",
        )
        .with_param("path", "src/a.rs");
        let reason = precheck().check(&action).unwrap_err();
        assert_eq!(reason, "incomplete parameters for write_file: missing content");

        let action = action.with_param("content", "fn main() {}");
        assert!(precheck().check(&action).is_ok());
    }

    #[test]
    fn test_null_value_counts_as_present() {
        let action = ToolAction::new(
            "execute_command",
            ActionScope::Execute,
            PermissionLevel::System,
            "shell",
        )
        .with_param("command", Value::Null);
        assert!(precheck().check(&action).is_ok());
    }

    #[test]
    fn test_methods_without_requirements_pass() {
        let action = ToolAction::new(
            "list_directory",
            ActionScope::Read,
            PermissionLevel::Basic,
            "src",
        );
        assert!(precheck().check(&action).is_ok());
    }

    #[test]
    fn test_traversal_target_rejected_before_params() {
        let action = ToolAction::new(
            "read_file",
            ActionScope::Read,
            PermissionLevel::Basic,
            "../etc/passwd",
        );
        let reason = precheck().check(&action).unwrap_err();
        assert!(reason.contains("../etc/passwd"));
    }

    #[test]
    fn test_empty_target_skips_deny_list() {
        let action = ToolAction::new(
            "get_environment",
            ActionScope::Read,
            PermissionLevel::Basic,
            "",
        );
        assert!(precheck().check(&action).is_ok());
    }
}
