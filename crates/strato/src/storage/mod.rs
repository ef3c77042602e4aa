//! Per-user persistent storage module.
//!
//! Sessions mount a named file share that survives compute teardown. This
//! module exposes the share store capability surface, its HTTP client, and
//! the idempotent provisioner the controller drives.

mod client;
mod error;
mod provisioner;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::ShareClient;
pub use error::{ShareError, ShareResult};
pub use provisioner::StorageProvisioner;

/// Metadata about an existing share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareInfo {
    /// Share name.
    pub name: String,
    /// Quota in GB.
    pub quota_gb: u32,
    /// Access tier, e.g. "TransactionOptimized".
    #[serde(default)]
    pub access_tier: Option<String>,
    /// Last modification time, when the store reports one.
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Minimal share store abstraction for testability.
#[async_trait]
pub trait ShareStoreApi: Send + Sync {
    /// List all shares in the storage account.
    async fn list_shares(&self) -> ShareResult<Vec<ShareInfo>>;

    /// Create a share with the given quota and access tier.
    async fn create_share(
        &self,
        name: &str,
        quota_gb: u32,
        access_tier: &str,
    ) -> ShareResult<()>;
}

#[async_trait]
impl ShareStoreApi for ShareClient {
    async fn list_shares(&self) -> ShareResult<Vec<ShareInfo>> {
        self.list_shares().await
    }

    async fn create_share(
        &self,
        name: &str,
        quota_gb: u32,
        access_tier: &str,
    ) -> ShareResult<()> {
        self.create_share(name, quota_gb, access_tier).await
    }
}
