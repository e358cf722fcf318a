//! Security module for AgentGate
//!
//! Permission tiers, human approval requests, and the target deny-list used
//! to decide whether a proposed action may run.

pub mod approval;
pub mod permission;
pub mod target;

pub use approval::{
    ApprovalClaim, ApprovalDraft, ApprovalEvent, ApprovalGate, ApprovalNotifier, ApprovalRequest, ApprovalStatus,
    ApprovalTicket, ChannelNotifier, LogNotifier,
};
pub use permission::{
    ActionScope, Authorization, AuthorizationRequest, AutoApprovalPolicy, LevelPolicy,
    PermissionAuthority, PermissionDenial, PermissionLevel,
};
pub use target::TargetPolicy;
