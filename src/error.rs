//! Error types for sentinel-core.

use thiserror::Error;

/// Result type alias using sentinel-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the detection pipeline.
///
/// None of these cross the `evaluate()` boundary: the Control Tower turns any
/// surviving error into a fail-closed verdict.
#[derive(Error, Debug)]
pub enum Error {
    /// A pattern in the library failed to compile
    #[error("Pattern compilation error: {name} - {message}")]
    Pattern { name: String, message: String },

    /// Embedding model could not be loaded or used
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// LLM provider error
    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    /// Timeout during a tier call
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Decision cache storage error
    #[error("Cache storage error: {0}")]
    CacheStorage(String),

    /// Audit sink error
    #[error("Audit sink error: {0}")]
    Audit(String),

    /// Policy document error
    #[error("Policy error: {0}")]
    Policy(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a pattern compilation error.
    pub fn pattern(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pattern {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }
}
