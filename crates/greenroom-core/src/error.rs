//! Engine-wide error taxonomy.
//!
//! Stage failures inside hybrid search and the conversation pipeline are
//! NOT represented here - those are converted to signal degradations and
//! recorded in response metadata. `CoreError` is for failures that escape
//! a component's fallback chain.

use std::time::Duration;

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Bad input from the caller
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown id (talent, conversation, experiment, ...)
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing credentials
    #[error("unauthorized")]
    Unauthorized,

    /// Insufficient role for the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Caller exceeded its request budget
    #[error("rate limited")]
    RateLimited,

    /// Upstream embedding / completion / vector-index backend is down
    /// and no cache or fallback could satisfy the request
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Durable store failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A bounded queue rejected the item
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A per-stage or overall deadline elapsed
    #[error("{stage} timed out after {elapsed:?}")]
    Timeout { stage: &'static str, elapsed: Duration },

    /// Invariant breach - always a bug
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable kind, used in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::NotFound(_) => "not_found",
            CoreError::Unauthorized => "unauthorized",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::RateLimited => "rate_limited",
            CoreError::ProviderUnavailable(_) => "provider_unavailable",
            CoreError::Persistence(_) => "persistence_error",
            CoreError::CapacityExceeded(_) => "capacity_exceeded",
            CoreError::Timeout { .. } => "timeout",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Shorthand for a stage timeout
    pub fn timeout(stage: &'static str, elapsed: Duration) -> Self {
        CoreError::Timeout { stage, elapsed }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Persistence(format!("serialization: {e}"))
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, CoreError>;
