//! Orchestrator error types

use std::time::Duration;
use thiserror::Error;

/// Orchestrator result type
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the orchestration controllers
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Request failed validation
    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Referenced job or resource does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation is not valid for the current job state
    #[error("invalid state for {id}: {message}")]
    InvalidState { id: String, message: String },

    /// Cluster adapter call failed
    #[error("cluster error during {operation}: {message}")]
    Cluster { operation: String, message: String },

    /// Operation timed out
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl OrchestratorError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create a new not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Create a new invalid-state error
    pub fn invalid_state(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidState { id: id.into(), message: message.into() }
    }

    /// Create a new cluster error
    pub fn cluster(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cluster { operation: operation.into(), message: message.into() }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}
