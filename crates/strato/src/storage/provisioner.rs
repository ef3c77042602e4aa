//! Idempotent per-user share provisioning.

use std::sync::Arc;

use log::{debug, info};

use crate::identity::SessionIdentity;

use super::error::{ShareError, ShareResult};
use super::ShareStoreApi;

/// Ensures each user's persistent share exists before a session mounts it.
///
/// Shares are created once and reused across session recreations; nothing
/// here ever deletes or resizes an existing share.
pub struct StorageProvisioner {
    store: Arc<dyn ShareStoreApi>,
    quota_gb: u32,
    access_tier: String,
}

impl StorageProvisioner {
    pub fn new(store: Arc<dyn ShareStoreApi>, quota_gb: u32, access_tier: impl Into<String>) -> Self {
        Self {
            store,
            quota_gb,
            access_tier: access_tier.into(),
        }
    }

    /// Ensure the share for this identity exists, creating it if absent.
    ///
    /// Losing a create race to a concurrent provisioner is success. Transient
    /// store failures propagate to the caller; there is no retry loop here.
    pub async fn ensure_volume(&self, identity: &SessionIdentity) -> ShareResult<()> {
        let share_name = identity.share_name();

        debug!("checking share exists: {share_name}");
        let shares = self.store.list_shares().await?;
        if shares.iter().any(|share| share.name == share_name) {
            debug!("found existing share: {share_name}");
            return Ok(());
        }

        info!(
            "creating share {share_name} ({} GB, {})",
            self.quota_gb, self.access_tier
        );
        match self
            .store
            .create_share(&share_name, self.quota_gb, &self.access_tier)
            .await
        {
            Ok(()) => Ok(()),
            Err(ShareError::AlreadyExists(_)) => {
                info!("share {share_name} was created concurrently");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
