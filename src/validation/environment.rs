//! Gate 3: environment detection.
//!
//! Two kinds of checks, all findings reported together:
//! - framework manifests (e.g. `package.json` for vue/react) must be among the
//!   visible files;
//! - execute-scope actions in a production project need the runtime-mode
//!   variable (`NODE_ENV` by default) to be set.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::ValidationConfig;
use crate::security::ActionScope;

use super::request::{ActionContext, ToolAction};

/// Source of environment variables.
pub trait EnvironmentProbe: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment. Empty values count as unset.
pub struct SystemEnv;

impl EnvironmentProbe for SystemEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed variable set.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv {
    vars: HashMap<String, String>,
}

impl StaticEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }
}

impl EnvironmentProbe for StaticEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

/// Everything the environment gate found missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentReport {
    pub missing_dependencies: Vec<String>,
    pub missing_env_vars: Vec<String>,
    pub suggestions: Vec<String>,
}

impl EnvironmentReport {
    pub fn is_ready(&self) -> bool {
        self.missing_dependencies.is_empty() && self.missing_env_vars.is_empty()
    }

    /// All missing items joined into one reason.
    pub fn reason(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing_dependencies.is_empty() {
            parts.push(format!(
                "missing dependencies: {}",
                self.missing_dependencies.join(", ")
            ));
        }
        if !self.missing_env_vars.is_empty() {
            parts.push(format!(
                "missing environment variables: {}",
                self.missing_env_vars.join(", ")
            ));
        }
        if parts.is_empty() {
            "environment not ready".to_string()
        } else {
            parts.join("; ")
        }
    }
}

pub struct EnvironmentCheck {
    framework_manifests: BTreeMap<String, Vec<String>>,
    runtime_mode_var: String,
    production_env: String,
    probe: Arc<dyn EnvironmentProbe>,
}

impl EnvironmentCheck {
    pub fn new(config: &ValidationConfig, probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self {
            framework_manifests: config.framework_manifests.clone(),
            runtime_mode_var: config.runtime_mode_var.clone(),
            production_env: config.production_env.clone(),
            probe,
        }
    }

    pub fn check(&self, action: &ToolAction, context: &ActionContext) -> EnvironmentReport {
        let mut report = EnvironmentReport::default();
        let framework = context.project.framework.as_str();

        if let Some(manifests) = self.framework_manifests.get(framework) {
            for manifest in manifests {
                let present = context
                    .visible_files
                    .iter()
                    .any(|f| f.contains(manifest.as_str()));
                if !present {
                    report.missing_dependencies.push(manifest.clone());
                    report.suggestions.push(format!(
                        "make sure the session is rooted at the {} project directory",
                        framework
                    ));
                }
            }
        }

        if action.scope == ActionScope::Execute
            && context.project.env == self.production_env
            && self.probe.var(&self.runtime_mode_var).is_none()
        {
            report.missing_env_vars.push(self.runtime_mode_var.clone());
            report.suggestions.push(format!(
                "set {} before running commands in {}",
                self.runtime_mode_var, self.production_env
            ));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::PermissionLevel;
    use crate::validation::request::ProjectContext;

    fn context(framework: &str, env: &str, files: &[&str]) -> ActionContext {
        ActionContext {
            project: ProjectContext {
                env: env.to_string(),
                framework: framework.to_string(),
                ..Default::default()
            },
            visible_files: files.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    fn check_with(env: StaticEnv) -> EnvironmentCheck {
        EnvironmentCheck::new(&ValidationConfig::default(), Arc::new(env))
    }

    fn run_action() -> ToolAction {
        ToolAction::new(
            "run_script",
            ActionScope::Execute,
            PermissionLevel::System,
            "build",
        )
    }

    #[test]
    fn test_vue_requires_package_json() {
        let check = check_with(StaticEnv::new());
        let read = ToolAction::new("read_file", ActionScope::Read, PermissionLevel::Basic, "a");
        let report = check.check(&read, &context("vue", "development", &["src/main.ts"]));
        assert!(!report.is_ready());
        assert_eq!(report.missing_dependencies, vec!["package.json"]);

        let report = check.check(
            &read,
            &context("vue", "development", &["app/package.json"]),
        );
        assert!(report.is_ready());
    }

    #[test]
    fn test_generic_framework_has_no_manifest() {
        let check = check_with(StaticEnv::new());
        let report = check.check(&run_action(), &context("generic", "development", &[]));
        assert!(report.is_ready());
    }

    #[test]
    fn test_production_execute_needs_runtime_var() {
        let check = check_with(StaticEnv::new());
        let report = check.check(&run_action(), &context("generic", "production", &[]));
        assert_eq!(report.missing_env_vars, vec!["NODE_ENV"]);

        let check = check_with(StaticEnv::new().with("NODE_ENV", "production"));
        assert!(check
            .check(&run_action(), &context("generic", "production", &[]))
            .is_ready());
    }

    #[test]
    fn test_reason_aggregates_all_missing_items() {
        let check = check_with(StaticEnv::new());
        let report = check.check(&run_action(), &context("react", "production", &[]));
        assert_eq!(
            report.reason(),
            "missing dependencies: package.json; missing environment variables: NODE_ENV"
        );
        assert_eq!(report.suggestions.len(), 2);
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let env = StaticEnv::new().with("NODE_ENV", "");
        assert!(env.var("NODE_ENV").is_none());
    }
}
