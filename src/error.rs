//! Error types for AgentGate
//!
//! This module defines the error type shared by the loop controller, the
//! validation pipeline, the permission authority and the service clients.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

/// The primary error type for AgentGate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors (invalid config, bad regex, unknown level, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation was attempted in a run state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Permission check failed (level, scope or method mismatch)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A validation gate rejected the action
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Resource not found (runs, checkpoints, approval requests, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// An external service answered with a failure envelope
    #[error("Service error: {0}")]
    Service(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GateError {
    /// Returns `true` if the error came from an external service call rather
    /// than from local state.
    pub fn is_service_failure(&self) -> bool {
        matches!(self, GateError::Service(_) | GateError::Http(_))
    }
}

/// A specialized `Result` type for AgentGate operations.
pub type Result<T> = std::result::Result<T, GateError>;
