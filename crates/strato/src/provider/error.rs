//! Compute provider error types.

use thiserror::Error;

/// Result type for compute provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur when talking to the compute provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The provider returned an error response.
    #[error("provider error: {message} (code: {code})")]
    Api { message: String, code: String },

    /// Compute group was not found.
    #[error("compute group not found: {0}")]
    NotFound(String),

    /// The group name is locked by an operation that has not settled yet,
    /// typically a prior delete or create on the same name.
    #[error("compute group {0} is still transitioning")]
    StillTransitioning(String),

    /// Unauthorized (invalid provider credentials).
    #[error("unauthorized: invalid provider credentials")]
    Unauthorized,

    /// Failed to parse a provider response.
    #[error("failed to parse provider response: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Whether a bounded retry may recover this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::StillTransitioning(_))
    }
}
