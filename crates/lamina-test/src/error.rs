//! Test error types.

use lamina_core::Fault;
use thiserror::Error;

/// Errors that can occur during testing.
#[derive(Debug, Error)]
pub enum TestError {
    /// The event could not be serialized.
    #[error("Event build error: {0}")]
    EventBuild(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The fallback transform rejected the invocation.
    #[error("Invocation rejected: {0}")]
    Rejected(Fault),
}
