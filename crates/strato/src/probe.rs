//! Session readiness probing.
//!
//! The provider can report a group as provisioned and its container as
//! running before the in-container service has bound its listening socket, so
//! neither provider state is sufficient on its own. A session counts as ready
//! only when provisioning succeeded, the container runs, AND a TCP connection
//! to the assigned address succeeds. The TCP probe is the final authority.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::provider::{ComputeGroup, InstanceState, ProvisioningState};

/// A reachable session address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Point-in-time view of a compute group's readiness inputs.
///
/// Recomputed on every poll, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSnapshot {
    pub provisioning: ProvisioningState,
    pub runtime: Option<InstanceState>,
    pub endpoint: Option<Endpoint>,
}

impl ReadinessSnapshot {
    /// Observe a group's current state.
    pub fn observe(group: &ComputeGroup) -> Self {
        let endpoint = group.ip_address.as_ref().and_then(|addr| {
            match (&addr.ip, addr.ports.first()) {
                (Some(ip), Some(port)) => Some(Endpoint {
                    address: ip.clone(),
                    port: port.port,
                }),
                _ => None,
            }
        });

        Self {
            provisioning: group.provisioning_state,
            runtime: group.instance_state(),
            endpoint,
        }
    }

    /// Whether both provider-reported states are green and an address has
    /// been assigned. TCP reachability still decides actual readiness.
    pub fn states_ready(&self) -> bool {
        self.provisioning == ProvisioningState::Succeeded
            && self.runtime == Some(InstanceState::Running)
            && self.endpoint.is_some()
    }
}

/// TCP reachability abstraction for testability.
#[async_trait]
pub trait Reachability: Send + Sync {
    /// Whether a TCP connection to (address, port) succeeds. Connection
    /// refused and timeout both mean "no"; this never errors.
    async fn can_connect(&self, address: &str, port: u16) -> bool;
}

/// Real TCP probe with its own timeout, independent of the spawn budget.
#[derive(Debug, Clone)]
pub struct TcpReachability {
    timeout: Duration,
}

impl TcpReachability {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Reachability for TcpReachability {
    async fn can_connect(&self, address: &str, port: u16) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("probe of {address}:{port} failed: {e}");
                false
            }
            Err(_) => {
                debug!("probe of {address}:{port} timed out after {:?}", self.timeout);
                false
            }
        }
    }
}

/// Decides whether a compute group is actually usable.
pub struct ReadinessProber {
    reach: Arc<dyn Reachability>,
}

impl ReadinessProber {
    pub fn new(reach: Arc<dyn Reachability>) -> Self {
        Self { reach }
    }

    /// Probe the group: `Some(endpoint)` iff provisioning succeeded, the
    /// container is running, and the endpoint answers on TCP. An absent
    /// group is never ready. Never returns a partial endpoint.
    pub async fn probe(&self, group: Option<&ComputeGroup>) -> Option<Endpoint> {
        let group = group?;
        let snapshot = ReadinessSnapshot::observe(group);
        if !snapshot.states_ready() {
            debug!(
                "group {} not ready: provisioning={} runtime={:?}",
                group.name, snapshot.provisioning, snapshot.runtime
            );
            return None;
        }

        let endpoint = snapshot.endpoint?;
        if self.reach.can_connect(&endpoint.address, endpoint.port).await {
            Some(endpoint)
        } else {
            debug!("group {} not reachable at {endpoint}", group.name);
            None
        }
    }
}
