//! Share store error types.

use thiserror::Error;

/// Result type for share store operations.
pub type ShareResult<T> = Result<T, ShareError>;

/// Errors that can occur when provisioning storage shares.
#[derive(Debug, Error)]
pub enum ShareError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The store returned an error response.
    #[error("share store error: {message} (code: {code})")]
    Api { message: String, code: String },

    /// A share with this name already exists.
    #[error("share already exists: {0}")]
    AlreadyExists(String),

    /// Unauthorized (invalid storage credentials).
    #[error("unauthorized: invalid storage credentials")]
    Unauthorized,

    /// Failed to parse a store response.
    #[error("failed to parse share store response: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ShareError::AlreadyExists("vol-alice".to_string());
        assert_eq!(err.to_string(), "share already exists: vol-alice");
    }
}
