//! AgentGate - control plane for autonomous coding agents
//!
//! Decides whether an action proposed by a driving model may run, gates it
//! behind tiered permissions and human approval, tracks the run's decisions
//! and tasks, and compacts conversation history before each model call.

pub mod agent;
pub mod audit;
pub mod config;
pub mod error;
pub mod security;
pub mod services;
pub mod utils;
pub mod validation;

pub use agent::{
    AgentLoopController, ContextCompactor, Decision, DecisionKind, LoopAction, LoopRegistry,
    LoopServices, RunStatus,
};
pub use config::Config;
pub use error::{GateError, Result};
pub use security::{
    ActionScope, ApprovalGate, ApprovalStatus, Authorization, PermissionAuthority,
    PermissionLevel,
};
pub use validation::{ValidationContext, ValidationPipeline, ValidationRequest};
