//! Session lifecycle error types.

use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderError;
use crate::storage::ShareError;

/// Result type for session start/poll operations.
pub type SpawnResult<T> = Result<T, SpawnError>;

/// Errors surfaced by `start` and `poll`.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// Readiness was not achieved within the spawn budget. A controller-level
    /// timeout, not a provider failure.
    #[error("session not ready after {attempts} poll attempts over {timeout:?}")]
    SpawnTimeout { timeout: Duration, attempts: u32 },

    /// Unrecoverable compute provider failure.
    #[error("compute provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Storage provisioning failure.
    #[error("storage provisioning failed: {0}")]
    Storage(#[from] ShareError),
}

impl SpawnError {
    /// Whether this is the controller-level spawn timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SpawnError::SpawnTimeout { .. })
    }
}

/// Result type for session teardown.
pub type StopResult<T> = Result<T, StopError>;

/// Errors surfaced by `teardown`. Plain `stop` is best-effort and suppresses
/// provider failures instead of raising them.
#[derive(Debug, Error)]
pub enum StopError {
    /// Deleting the compute group failed.
    #[error("failed to delete compute group {group}: {source}")]
    Delete {
        group: String,
        #[source]
        source: ProviderError,
    },
}
