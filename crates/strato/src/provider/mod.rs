//! Compute provider client module.
//!
//! Thin capability surface over the remote orchestration API. All calls are
//! accepted-but-asynchronous on the provider side: a successful call means
//! the request was admitted, never that the group reached the desired state.

mod client;
mod error;
mod types;

use async_trait::async_trait;

pub use client::ProviderClient;
pub use error::{ProviderError, ProviderResult};
pub use types::*;

/// Minimal compute provider abstraction for testability.
///
/// Must be safe for concurrent use by multiple controller instances (one per
/// concurrently-starting user); the remote group name serializes operations
/// per user at the provider.
#[async_trait]
pub trait ComputeProviderApi: Send + Sync {
    /// Fetch a group by name. `None` when it does not exist; other failures
    /// propagate.
    async fn get(&self, group_name: &str) -> ProviderResult<Option<ComputeGroup>>;

    /// Submit a group spec (create or replace). Accepted asynchronously.
    async fn create_or_update(&self, group_name: &str, spec: &GroupSpec) -> ProviderResult<()>;

    /// Delete a group.
    async fn delete(&self, group_name: &str) -> ProviderResult<()>;

    /// Start a stopped group.
    async fn start(&self, group_name: &str) -> ProviderResult<()>;

    /// Stop a running group without deleting it.
    async fn stop(&self, group_name: &str) -> ProviderResult<()>;
}

#[async_trait]
impl ComputeProviderApi for ProviderClient {
    async fn get(&self, group_name: &str) -> ProviderResult<Option<ComputeGroup>> {
        self.get(group_name).await
    }

    async fn create_or_update(&self, group_name: &str, spec: &GroupSpec) -> ProviderResult<()> {
        self.create_or_update(group_name, spec).await
    }

    async fn delete(&self, group_name: &str) -> ProviderResult<()> {
        self.delete(group_name).await
    }

    async fn start(&self, group_name: &str) -> ProviderResult<()> {
        self.start(group_name).await
    }

    async fn stop(&self, group_name: &str) -> ProviderResult<()> {
        self.stop(group_name).await
    }
}
