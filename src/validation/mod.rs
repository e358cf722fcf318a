//! Four-gate validation pipeline.
//!
//! ```text
//!  ValidationRequest
//!        │
//!        ▼
//!  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!  │ 1. intent    │─►│ 2. permission│─►│ 3. environ-  │─►│ 4. execution │
//!  │ recognition  │  │ check        │  │ ment         │  │ precheck     │
//!  └──────────────┘  └──────────────┘  └──────────────┘  └──────────────┘
//!        │ fail             │ fail             │ fail             │ fail
//!        └──────────────────┴────────┬─────────┴──────────────────┘
//!                                    ▼
//!                         ValidationContext { all_passed: false }
//! ```
//!
//! Gates run in fixed order and the pipeline stops at the first failure.
//! Gate 2 delegates to the [`PermissionAuthority`], which may suspend the
//! pipeline while a human approves the action. A failed validation is never
//! retried here; the model has to propose a corrected action.

pub mod environment;
pub mod intent;
pub mod precheck;
pub mod request;

pub use environment::{EnvironmentCheck, EnvironmentProbe, EnvironmentReport, StaticEnv, SystemEnv};
pub use intent::{Intent, IntentClassifier, IntentMatch};
pub use precheck::ExecutionPrecheck;
pub use request::{
    ActionContext, MessageMeta, ProjectContext, ToolAction, ValidationContext, ValidationPhase,
    ValidationRequest, ValidationResult,
};

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info_span, Instrument};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::ValidationConfig;
use crate::error::Result;
use crate::security::{Authorization, AuthorizationRequest, PermissionAuthority};

pub struct ValidationPipeline {
    authority: Arc<PermissionAuthority>,
    intent: IntentClassifier,
    environment: EnvironmentCheck,
    precheck: ExecutionPrecheck,
}

impl ValidationPipeline {
    /// Pipeline reading environment variables from the process.
    pub fn new(authority: Arc<PermissionAuthority>, config: &ValidationConfig) -> Result<Self> {
        Self::with_env(authority, config, Arc::new(SystemEnv))
    }

    /// Pipeline reading environment variables from `probe`.
    pub fn with_env(
        authority: Arc<PermissionAuthority>,
        config: &ValidationConfig,
        probe: Arc<dyn EnvironmentProbe>,
    ) -> Result<Self> {
        Ok(Self {
            authority,
            intent: IntentClassifier::new()?,
            environment: EnvironmentCheck::new(config, probe),
            precheck: ExecutionPrecheck::new(config)?,
        })
    }

    pub fn authority(&self) -> &Arc<PermissionAuthority> {
        &self.authority
    }

    /// Run all four gates over one action.
    pub async fn validate(&self, request: &ValidationRequest) -> ValidationContext {
        let span = info_span!(
            "validate",
            session = %request.meta.session,
            method = %request.action.method,
            target = %request.action.target,
        );
        self.run_gates(request).instrument(span).await
    }

    async fn run_gates(&self, request: &ValidationRequest) -> ValidationContext {
        let started = Instant::now();
        let mut context = ValidationContext {
            results: Vec::with_capacity(ValidationPhase::ORDER.len()),
            all_passed: true,
            total_duration_ms: 0,
        };

        for phase in ValidationPhase::ORDER {
            let gate_started = Instant::now();
            let outcome = self.run_gate(phase, request).await;
            let result = ValidationResult {
                phase,
                passed: outcome.is_ok(),
                reason: outcome.err(),
                duration_ms: gate_started.elapsed().as_millis() as u64,
            };
            debug!(phase = %phase, passed = result.passed, "Gate finished");

            let passed = result.passed;
            if let Some(reason) = &result.reason {
                log_audit_event(
                    AuditCategory::ValidationFailure,
                    AuditSeverity::Warning,
                    phase.as_str(),
                    &format!("{}: {}", request.action.method, reason),
                    true,
                );
            }
            context.results.push(result);
            if !passed {
                context.all_passed = false;
                break;
            }
        }

        context.total_duration_ms = started.elapsed().as_millis() as u64;
        context
    }

    async fn run_gate(
        &self,
        phase: ValidationPhase,
        request: &ValidationRequest,
    ) -> std::result::Result<(), String> {
        let action = &request.action;
        match phase {
            ValidationPhase::IntentRecognition => self.intent.check(&action.method).map(|_| ()),
            ValidationPhase::PermissionCheck => {
                let decision_id = Some(request.meta.message_id.clone()).filter(|id| !id.is_empty());
                let authorization = self
                    .authority
                    .authorize(&AuthorizationRequest {
                        decision_id,
                        method: action.method.clone(),
                        scope: action.scope,
                        level: action.required_permission,
                        target: action.target.clone(),
                    })
                    .await;
                match authorization {
                    Authorization::Allowed => Ok(()),
                    Authorization::Denied(denial) => Err(denial.to_string()),
                    Authorization::NotApproved(status) => {
                        Err(format!("operation not approved ({})", status))
                    }
                }
            }
            ValidationPhase::EnvironmentDetection => {
                let report = self.environment.check(action, &request.context);
                if report.is_ready() {
                    Ok(())
                } else {
                    Err(report.reason())
                }
            }
            ValidationPhase::OperationExecution => self.precheck.check(action),
        }
    }
}
