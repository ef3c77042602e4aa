//! Spawner configuration.
//!
//! All provider-facing attributes of a session (image, limits, credentials,
//! network references, timing budgets) live in one immutable struct handed to
//! the controller at construction time. Validation happens once, up front.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was left empty.
    #[error("missing required config field: {0}")]
    MissingField(&'static str),

    /// A field holds a value outside its valid range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

/// Immutable configuration for a session spawner.
#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    /// Container image for session groups.
    pub image: String,
    /// Registry server the image is pulled from.
    pub registry_server: String,
    /// Registry username.
    pub registry_username: String,
    /// Registry password.
    pub registry_password: String,
    /// Storage account backing the per-user shares.
    pub storage_account: String,
    /// Storage account access key (also embedded in group volume specs).
    pub storage_key: String,
    /// Quota in GB for each user share.
    pub storage_quota_gb: u32,
    /// Access tier for newly created shares.
    pub storage_access_tier: String,
    /// Location/region for new compute groups.
    pub location: String,
    /// Subnet the compute groups attach to.
    pub subnet_id: String,
    /// Subnet name accompanying the subnet id.
    pub subnet_name: String,
    /// Port the session service listens on inside the container.
    pub port: u16,
    /// CPU cores allocated to each session container.
    pub cpu_cores: f64,
    /// Memory in GB allocated to each session container.
    pub memory_gb: f64,
    /// Mount path for the user share inside the container.
    pub mount_path: String,
    /// Overall readiness budget for `start`. Provider spawning is slow,
    /// expect several minutes.
    pub spawn_timeout: Duration,
    /// Fixed delay between readiness polls, also used between create retries
    /// when the group is still transitioning.
    pub poll_interval: Duration,
    /// Timeout for each TCP readiness probe, independent of the spawn budget.
    pub probe_timeout: Duration,
    /// Extra paths prepended to the `PATH` environment variable.
    /// `{USERNAME}` and `{USERID}` are expanded.
    pub extra_paths: Vec<String>,
    /// Static environment merged into every launch environment.
    pub extra_env: HashMap<String, String>,
    /// Environment variable names scanned to recover a session API token
    /// when reusing an existing group.
    pub api_token_vars: Vec<String>,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            registry_server: String::new(),
            registry_username: String::new(),
            registry_password: String::new(),
            storage_account: String::new(),
            storage_key: String::new(),
            storage_quota_gb: 2,
            storage_access_tier: "TransactionOptimized".to_string(),
            location: String::new(),
            subnet_id: String::new(),
            subnet_name: String::new(),
            port: 80,
            cpu_cores: 1.0,
            memory_gb: 4.0,
            mount_path: "/home/session".to_string(),
            spawn_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            extra_paths: Vec::new(),
            extra_env: HashMap::new(),
            api_token_vars: vec!["SESSION_API_TOKEN".to_string()],
        }
    }
}

impl SpawnerConfig {
    /// Validate all fields. Called by the controller constructor so a
    /// misconfigured spawner fails fast instead of at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("image", &self.image)?;
        require("registry_server", &self.registry_server)?;
        require("registry_username", &self.registry_username)?;
        require("registry_password", &self.registry_password)?;
        require("storage_account", &self.storage_account)?;
        require("storage_key", &self.storage_key)?;
        require("storage_access_tier", &self.storage_access_tier)?;
        require("location", &self.location)?;
        require("subnet_id", &self.subnet_id)?;
        require("subnet_name", &self.subnet_name)?;

        if self.port == 0 {
            return Err(invalid("port", "must be non-zero"));
        }
        if self.cpu_cores <= 0.0 {
            return Err(invalid("cpu_cores", "must be positive"));
        }
        if self.memory_gb <= 0.0 {
            return Err(invalid("memory_gb", "must be positive"));
        }
        if self.storage_quota_gb == 0 {
            return Err(invalid("storage_quota_gb", "must be non-zero"));
        }
        if !self.mount_path.starts_with('/') {
            return Err(invalid("mount_path", "must be an absolute path"));
        }
        if self.spawn_timeout.is_zero() {
            return Err(invalid("spawn_timeout", "must be non-zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be non-zero"));
        }
        if self.probe_timeout.is_zero() {
            return Err(invalid("probe_timeout", "must be non-zero"));
        }

        Ok(())
    }

    /// Number of readiness polls before `start` gives up: the spawn timeout
    /// divided by the poll interval, rounded up.
    pub fn max_poll_attempts(&self) -> u32 {
        let timeout = self.spawn_timeout.as_millis().max(1);
        let interval = self.poll_interval.as_millis().max(1);
        timeout.div_ceil(interval) as u32
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField(field))
    } else {
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
