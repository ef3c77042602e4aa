//! Compute group wire types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provisioning state the provider reports for a compute group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Request accepted, provisioning not started.
    Pending,
    /// Resources are being created.
    Creating,
    /// Provisioning completed successfully.
    Succeeded,
    /// Provisioning failed.
    Failed,
    /// Any state this client does not model.
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningState::Pending => write!(f, "Pending"),
            ProvisioningState::Creating => write!(f, "Creating"),
            ProvisioningState::Succeeded => write!(f, "Succeeded"),
            ProvisioningState::Failed => write!(f, "Failed"),
            ProvisioningState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Runtime state of a container instance inside a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Instance exists but has not started.
    Waiting,
    /// Instance is running.
    Running,
    /// Instance has exited.
    Terminated,
    /// Any state this client does not model.
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Waiting => write!(f, "Waiting"),
            InstanceState::Running => write!(f, "Running"),
            InstanceState::Terminated => write!(f, "Terminated"),
            InstanceState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Operating system requested for a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
    #[default]
    Linux,
    Windows,
}

/// One exposed TCP port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl PortSpec {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: default_protocol(),
        }
    }
}

/// Network exposure of a group: a private address plus its open ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAddress {
    /// Assigned address. Present only once the provider has allocated one.
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    /// Exposure kind, e.g. "Private".
    pub kind: String,
}

impl GroupAddress {
    /// Exposure spec for a private address on the given port.
    pub fn private(port: u16) -> Self {
        Self {
            ip: None,
            ports: vec![PortSpec::tcp(port)],
            kind: "Private".to_string(),
        }
    }
}

/// Mount of a named group volume into a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of the group volume to mount. Must match a [`VolumeSpec`] name.
    pub name: String,
    pub mount_path: String,
}

/// A file-share-backed volume attached to a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub share_name: String,
    pub storage_account: String,
    pub storage_key: String,
}

/// Credentials for pulling the container image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCredential {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// Reference to the subnet a group attaches to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetRef {
    pub id: String,
    pub name: String,
}

/// Spec for the single container inside a group.
///
/// The same shape is used on the write path (submitting a group) and the read
/// path, where the provider additionally fills `instance_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cpu_cores: f64,
    pub memory_gb: f64,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    /// Runtime state, reported by the provider. Never sent on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<InstanceState>,
}

impl ContainerSpec {
    /// Create a container spec with the given name and image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cpu_cores: 1.0,
            memory_gb: 1.0,
            command: Vec::new(),
            env: HashMap::new(),
            ports: Vec::new(),
            volume_mounts: Vec::new(),
            instance_state: None,
        }
    }

    /// Set the resource requests.
    pub fn resources(mut self, cpu_cores: f64, memory_gb: f64) -> Self {
        self.cpu_cores = cpu_cores;
        self.memory_gb = memory_gb;
        self
    }

    /// Set the command to run.
    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs(mut self, envs: HashMap<String, String>) -> Self {
        self.env.extend(envs);
        self
    }

    /// Expose a TCP port.
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(PortSpec::tcp(port));
        self
    }

    /// Mount a group volume.
    pub fn volume_mount(
        mut self,
        name: impl Into<String>,
        mount_path: impl Into<String>,
    ) -> Self {
        self.volume_mounts.push(VolumeMount {
            name: name.into(),
            mount_path: mount_path.into(),
        });
        self
    }
}

/// Spec submitted to create or update a compute group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub location: String,
    #[serde(default)]
    pub os_type: OsType,
    pub containers: Vec<ContainerSpec>,
    pub ip_address: GroupAddress,
    #[serde(default)]
    pub registry_credentials: Vec<RegistryCredential>,
    #[serde(default)]
    pub subnet_ids: Vec<SubnetRef>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
}

impl GroupSpec {
    /// Create a Linux group spec in the given location.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            os_type: OsType::Linux,
            containers: Vec::new(),
            ip_address: GroupAddress::private(0),
            registry_credentials: Vec::new(),
            subnet_ids: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Add a container.
    pub fn container(mut self, container: ContainerSpec) -> Self {
        self.containers.push(container);
        self
    }

    /// Expose the group on a private address with the given port.
    pub fn private_address(mut self, port: u16) -> Self {
        self.ip_address = GroupAddress::private(port);
        self
    }

    /// Add registry credentials.
    pub fn registry_credential(mut self, credential: RegistryCredential) -> Self {
        self.registry_credentials.push(credential);
        self
    }

    /// Attach the group to a subnet.
    pub fn subnet(mut self, subnet: SubnetRef) -> Self {
        self.subnet_ids.push(subnet);
        self
    }

    /// Attach a share-backed volume.
    pub fn volume(mut self, volume: VolumeSpec) -> Self {
        self.volumes.push(volume);
        self
    }
}

/// A compute group as read back from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeGroup {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub provisioning_state: ProvisioningState,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub ip_address: Option<GroupAddress>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ComputeGroup {
    /// Runtime state of the group's container, when reported.
    pub fn instance_state(&self) -> Option<InstanceState> {
        self.containers.first().and_then(|c| c.instance_state)
    }

    /// Look up an environment variable on the group's container.
    pub fn container_env_var(&self, name: &str) -> Option<&str> {
        self.containers
            .first()
            .and_then(|c| c.env.get(name))
            .map(String::as_str)
    }
}
