//! Session lifecycle controller.
//!
//! Reconciles the provider's accepted-but-asynchronous create/start/stop
//! semantics into a synchronous contract: `start` hands back a reachable
//! endpoint or a definitive failure, never a partial address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};

use crate::config::{ConfigError, SpawnerConfig};
use crate::identity::SessionIdentity;
use crate::probe::{Reachability, ReadinessProber, TcpReachability};
use crate::provider::{
    ComputeGroup, ComputeProviderApi, ContainerSpec, GroupSpec, ProviderError,
    RegistryCredential, SubnetRef, VolumeSpec,
};
use crate::storage::{ShareStoreApi, StorageProvisioner};

use super::error::{SpawnError, SpawnResult, StopError, StopResult};
use super::models::{Endpoint, LaunchSpec, SessionPhase, SessionState};

/// Exit-status sentinel reported by `poll` while the session is not ready.
const NOT_READY_STATUS: i32 = 1;

/// Total create-or-update attempts while the provider keeps reporting the
/// group as still transitioning: one initial call plus three retries, with a
/// fixed delay between them. The group name is a mutex point at the
/// provider; the race resolves when the prior operation settles.
const CREATE_ATTEMPTS: u32 = 4;

/// Drives one user's session through create-or-reuse, poll-until-ready, and
/// stop/teardown. One instance per user; instances share the provider and
/// share-store clients, which are safe for concurrent use.
pub struct SessionSpawner {
    identity: SessionIdentity,
    provider: Arc<dyn ComputeProviderApi>,
    storage: StorageProvisioner,
    prober: ReadinessProber,
    config: SpawnerConfig,
    state: Mutex<SessionState>,
}

impl SessionSpawner {
    /// Create a spawner for one user. Fails fast on invalid configuration.
    pub fn new(
        identity: SessionIdentity,
        provider: Arc<dyn ComputeProviderApi>,
        shares: Arc<dyn ShareStoreApi>,
        config: SpawnerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let storage = StorageProvisioner::new(
            shares,
            config.storage_quota_gb,
            config.storage_access_tier.clone(),
        );
        let prober = ReadinessProber::new(Arc::new(TcpReachability::new(config.probe_timeout)));

        Ok(Self {
            identity,
            provider,
            storage,
            prober,
            config,
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Replace the TCP readiness probe, for tests and alternate transports.
    pub fn with_reachability(mut self, reach: Arc<dyn Reachability>) -> Self {
        self.prober = ReadinessProber::new(reach);
        self
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Snapshot of the controller state, for hub-side persistence.
    pub fn state(&self) -> SessionState {
        self.state_guard().clone()
    }

    /// Restore controller state persisted by an earlier process.
    pub fn restore_state(&self, state: SessionState) {
        *self.state_guard() = state;
    }

    fn state_guard(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.state_guard().phase = phase;
    }

    /// Start the session: reuse the existing compute group when the provider
    /// accepts a start against it, otherwise provision storage and create the
    /// group, then poll until it is reachable or the spawn budget runs out.
    pub async fn start(&self, launch: &LaunchSpec) -> SpawnResult<Endpoint> {
        let group_name = self.identity.group_name();
        info!(
            "starting session for {} (group {group_name})",
            self.identity.username()
        );

        if self.try_start_existing(&group_name).await {
            self.set_phase(SessionPhase::StartingExisting);
        } else if let Err(e) = self.create_session(&group_name, launch).await {
            self.set_phase(SessionPhase::Failed);
            return Err(e);
        }

        match self.poll_until_ready(&group_name).await {
            Ok(endpoint) => {
                {
                    let mut state = self.state_guard();
                    state.phase = SessionPhase::Ready;
                    state.endpoint = Some(endpoint.clone());
                }
                info!("session {group_name} ready at {endpoint}");
                Ok(endpoint)
            }
            Err(e) => {
                self.set_phase(if e.is_timeout() {
                    SessionPhase::TimedOut
                } else {
                    SessionPhase::Failed
                });
                Err(e)
            }
        }
    }

    /// Liveness check: `Ok(None)` while the session is ready and reachable,
    /// `Ok(Some(status))` with a non-zero sentinel when it is not. Only
    /// errors when the provider lookup itself fails.
    pub async fn poll(&self) -> SpawnResult<Option<i32>> {
        let group = self.provider.get(&self.identity.group_name()).await?;
        match self.prober.probe(group.as_ref()).await {
            Some(_) => Ok(None),
            None => Ok(Some(NOT_READY_STATUS)),
        }
    }

    /// Gracefully stop the session's compute group without deleting it.
    ///
    /// Best-effort: a missing group already counts as stopped, and provider
    /// failures are logged rather than surfaced so cleanup never blocks the
    /// caller.
    pub async fn stop(&self) {
        let group_name = self.identity.group_name();
        info!("stopping compute group {group_name}");

        match self.provider.stop(&group_name).await {
            Ok(()) => {
                self.state_guard().endpoint = None;
            }
            Err(ProviderError::NotFound(_)) => {
                debug!("compute group {group_name} does not exist, nothing to stop");
            }
            Err(e) => {
                warn!("failed to stop compute group {group_name}: {e}");
            }
        }
    }

    /// Delete the session's compute group. The storage share is preserved by
    /// design and survives recreation.
    pub async fn teardown(&self) -> StopResult<()> {
        let group_name = self.identity.group_name();
        info!("deleting compute group {group_name}");

        match self.provider.delete(&group_name).await {
            Ok(()) => {}
            Err(ProviderError::NotFound(_)) => {
                debug!("compute group {group_name} already deleted");
            }
            Err(source) => {
                return Err(StopError::Delete {
                    group: group_name,
                    source,
                });
            }
        }

        *self.state_guard() = SessionState::default();
        Ok(())
    }

    /// Attempt to reuse an existing compute group. Returns true when the
    /// provider accepted a start against it. Lookup and start failures both
    /// fall back to the create path rather than failing the spawn.
    async fn try_start_existing(&self, group_name: &str) -> bool {
        let group = match self.provider.get(group_name).await {
            Ok(Some(group)) => group,
            Ok(None) => return false,
            Err(e) => {
                warn!("failed to look up compute group {group_name}: {e}");
                return false;
            }
        };

        if let Some(token) = self.recover_api_token(&group) {
            debug!("recovered session API token from existing group {group_name}");
            self.state_guard().api_token = Some(token);
        }

        match self.provider.start(group_name).await {
            Ok(()) => {
                info!("reusing existing compute group {group_name}");
                true
            }
            Err(e) => {
                warn!("failed to start existing compute group {group_name}, recreating: {e}");
                false
            }
        }
    }

    fn recover_api_token(&self, group: &ComputeGroup) -> Option<String> {
        self.config
            .api_token_vars
            .iter()
            .find_map(|name| group.container_env_var(name).map(str::to_string))
    }

    async fn create_session(&self, group_name: &str, launch: &LaunchSpec) -> SpawnResult<()> {
        self.set_phase(SessionPhase::Creating);

        self.storage.ensure_volume(&self.identity).await?;

        let spec = self.build_group_spec(launch);
        self.submit_group(group_name, &spec).await
    }

    /// Submit the group spec, retrying on the still-transitioning race left
    /// behind by a prior delete or create on the same name.
    async fn submit_group(&self, group_name: &str, spec: &GroupSpec) -> SpawnResult<()> {
        let mut attempt = 1;
        loop {
            match self.provider.create_or_update(group_name, spec).await {
                Ok(()) => {
                    debug!("create accepted for {group_name} (attempt {attempt})");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < CREATE_ATTEMPTS => {
                    warn!(
                        "compute group {group_name} still transitioning \
                         (attempt {attempt}/{CREATE_ATTEMPTS}), retrying in {:?}",
                        self.config.poll_interval
                    );
                    tokio::time::sleep(self.config.poll_interval).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Poll the group at a fixed interval until it is reachable, for at most
    /// `ceil(spawn_timeout / poll_interval)` attempts. No background work
    /// survives past the budget: the loop returns a timeout and stops.
    async fn poll_until_ready(&self, group_name: &str) -> SpawnResult<Endpoint> {
        self.set_phase(SessionPhase::Polling);

        let attempts = self.config.max_poll_attempts();
        for attempt in 1..=attempts {
            debug!("polling {group_name} (attempt {attempt}/{attempts})");
            let group = self.provider.get(group_name).await?;
            if let Some(endpoint) = self.prober.probe(group.as_ref()).await {
                debug!("{group_name} became ready on poll attempt {attempt}");
                return Ok(endpoint);
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        warn!("{group_name} not ready after {attempts} poll attempts");
        Err(SpawnError::SpawnTimeout {
            timeout: self.config.spawn_timeout,
            attempts,
        })
    }

    /// Build the launch environment: caller env, then extra paths prepended
    /// to PATH (placeholders expanded), then static extra env from config.
    fn build_env(&self, launch: &LaunchSpec) -> HashMap<String, String> {
        let mut env = launch.env.clone();

        if !self.config.extra_paths.is_empty() {
            let extra = self
                .config
                .extra_paths
                .iter()
                .map(|p| self.identity.expand_placeholders(p))
                .collect::<Vec<_>>()
                .join(":");
            let path = match env.get("PATH") {
                Some(current) => format!("{extra}:{current}"),
                None => extra,
            };
            env.insert("PATH".to_string(), path);
        }

        for (key, value) in &self.config.extra_env {
            env.insert(key.clone(), value.clone());
        }

        env
    }

    fn build_group_spec(&self, launch: &LaunchSpec) -> GroupSpec {
        let share_name = self.identity.share_name();

        let container = ContainerSpec::new(self.identity.container_name(), &self.config.image)
            .resources(self.config.cpu_cores, self.config.memory_gb)
            .command(launch.command.clone())
            .envs(self.build_env(launch))
            .port(self.config.port)
            .volume_mount(&share_name, &self.config.mount_path);

        GroupSpec::new(&self.config.location)
            .container(container)
            .private_address(self.config.port)
            .registry_credential(RegistryCredential {
                server: self.config.registry_server.clone(),
                username: self.config.registry_username.clone(),
                password: self.config.registry_password.clone(),
            })
            .subnet(SubnetRef {
                id: self.config.subnet_id.clone(),
                name: self.config.subnet_name.clone(),
            })
            .volume(VolumeSpec {
                name: share_name.clone(),
                share_name,
                storage_account: self.config.storage_account.clone(),
                storage_key: self.config.storage_key.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        GroupAddress, InstanceState, PortSpec, ProviderResult, ProvisioningState,
    };
    use crate::storage::{ShareInfo, ShareResult};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Call counters shared by the provider fake.
    #[derive(Debug, Default, Clone)]
    struct ProviderCalls {
        get: u32,
        create: u32,
        start: u32,
        stop: u32,
        delete: u32,
    }

    /// Provider fake that fulfils create requests instantly: the resulting
    /// group reports green provider states, and actual readiness is gated by
    /// the reachability fake.
    #[derive(Default)]
    struct FakeProvider {
        group: Mutex<Option<ComputeGroup>>,
        calls: Mutex<ProviderCalls>,
        last_spec: Mutex<Option<GroupSpec>>,
        /// Remaining create calls rejected as still-transitioning.
        transitioning_rejections: Mutex<u32>,
        fail_start: bool,
        fail_get: bool,
        fail_stop: bool,
        fail_delete: bool,
    }

    impl FakeProvider {
        fn with_group(group: ComputeGroup) -> Self {
            Self {
                group: Mutex::new(Some(group)),
                ..Self::default()
            }
        }

        fn with_transitioning_rejections(count: u32) -> Self {
            Self {
                transitioning_rejections: Mutex::new(count),
                ..Self::default()
            }
        }

        fn calls(&self) -> ProviderCalls {
            self.calls.lock().unwrap().clone()
        }

        fn last_spec(&self) -> Option<GroupSpec> {
            self.last_spec.lock().unwrap().clone()
        }
    }

    fn ready_group(name: &str, address: &str, port: u16) -> ComputeGroup {
        let mut container = ContainerSpec::new("session-test", "img:latest");
        container.instance_state = Some(InstanceState::Running);
        ComputeGroup {
            name: name.to_string(),
            location: "westus2".to_string(),
            provisioning_state: ProvisioningState::Succeeded,
            containers: vec![container],
            ip_address: Some(GroupAddress {
                ip: Some(address.to_string()),
                ports: vec![PortSpec::tcp(port)],
                kind: "Private".to_string(),
            }),
            created_at: None,
        }
    }

    fn group_from_spec(name: &str, spec: &GroupSpec) -> ComputeGroup {
        let mut containers = spec.containers.clone();
        for container in &mut containers {
            container.instance_state = Some(InstanceState::Running);
        }
        ComputeGroup {
            name: name.to_string(),
            location: spec.location.clone(),
            provisioning_state: ProvisioningState::Succeeded,
            containers,
            ip_address: Some(GroupAddress {
                ip: Some("10.0.0.5".to_string()),
                ports: spec.ip_address.ports.clone(),
                kind: spec.ip_address.kind.clone(),
            }),
            created_at: None,
        }
    }

    #[async_trait]
    impl ComputeProviderApi for FakeProvider {
        async fn get(&self, group_name: &str) -> ProviderResult<Option<ComputeGroup>> {
            self.calls.lock().unwrap().get += 1;
            if self.fail_get {
                return Err(ProviderError::Api {
                    message: "lookup failed".to_string(),
                    code: "internal".to_string(),
                });
            }
            let _ = group_name;
            Ok(self.group.lock().unwrap().clone())
        }

        async fn create_or_update(
            &self,
            group_name: &str,
            spec: &GroupSpec,
        ) -> ProviderResult<()> {
            self.calls.lock().unwrap().create += 1;
            {
                let mut remaining = self.transitioning_rejections.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ProviderError::StillTransitioning(group_name.to_string()));
                }
            }
            *self.last_spec.lock().unwrap() = Some(spec.clone());
            *self.group.lock().unwrap() = Some(group_from_spec(group_name, spec));
            Ok(())
        }

        async fn delete(&self, group_name: &str) -> ProviderResult<()> {
            self.calls.lock().unwrap().delete += 1;
            if self.fail_delete {
                return Err(ProviderError::Api {
                    message: "delete failed".to_string(),
                    code: "internal".to_string(),
                });
            }
            if self.group.lock().unwrap().take().is_none() {
                return Err(ProviderError::NotFound(group_name.to_string()));
            }
            Ok(())
        }

        async fn start(&self, group_name: &str) -> ProviderResult<()> {
            self.calls.lock().unwrap().start += 1;
            if self.fail_start {
                return Err(ProviderError::Api {
                    message: "start rejected".to_string(),
                    code: "internal".to_string(),
                });
            }
            if self.group.lock().unwrap().is_none() {
                return Err(ProviderError::NotFound(group_name.to_string()));
            }
            Ok(())
        }

        async fn stop(&self, group_name: &str) -> ProviderResult<()> {
            self.calls.lock().unwrap().stop += 1;
            if self.fail_stop {
                return Err(ProviderError::Api {
                    message: "stop rejected".to_string(),
                    code: "internal".to_string(),
                });
            }
            if self.group.lock().unwrap().is_none() {
                return Err(ProviderError::NotFound(group_name.to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeShares {
        existing: Mutex<Vec<String>>,
        create_calls: Mutex<u32>,
        list_calls: Mutex<u32>,
    }

    impl FakeShares {
        fn create_calls(&self) -> u32 {
            *self.create_calls.lock().unwrap()
        }

        fn list_calls(&self) -> u32 {
            *self.list_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ShareStoreApi for FakeShares {
        async fn list_shares(&self) -> ShareResult<Vec<ShareInfo>> {
            *self.list_calls.lock().unwrap() += 1;
            Ok(self
                .existing
                .lock()
                .unwrap()
                .iter()
                .map(|name| ShareInfo {
                    name: name.clone(),
                    quota_gb: 2,
                    access_tier: None,
                    last_modified: None,
                })
                .collect())
        }

        async fn create_share(
            &self,
            name: &str,
            _quota_gb: u32,
            _access_tier: &str,
        ) -> ShareResult<()> {
            *self.create_calls.lock().unwrap() += 1;
            self.existing.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    /// Reachability fake: connects successfully starting from the Nth probe
    /// (0 = never).
    #[derive(Default)]
    struct FakeReachability {
        ready_after: u32,
        calls: Mutex<u32>,
    }

    impl FakeReachability {
        fn ready_after(probes: u32) -> Self {
            Self {
                ready_after: probes,
                calls: Mutex::new(0),
            }
        }

        fn never() -> Self {
            Self::default()
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Reachability for FakeReachability {
        async fn can_connect(&self, _address: &str, _port: u16) -> bool {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            self.ready_after != 0 && *calls >= self.ready_after
        }
    }

    fn test_config() -> SpawnerConfig {
        SpawnerConfig {
            image: "registry.example.com/session:latest".to_string(),
            registry_server: "registry.example.com".to_string(),
            registry_username: "puller".to_string(),
            registry_password: "secret".to_string(),
            storage_account: "sessionstore".to_string(),
            storage_key: "storage-key".to_string(),
            location: "westus2".to_string(),
            subnet_id: "/subnets/sessions".to_string(),
            subnet_name: "sessions".to_string(),
            // Production timings scaled to milliseconds so the 30-attempt
            // budget stays fast: 300 / 10 = 30.
            spawn_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(50),
            ..SpawnerConfig::default()
        }
    }

    struct Harness {
        provider: Arc<FakeProvider>,
        shares: Arc<FakeShares>,
        reach: Arc<FakeReachability>,
        spawner: SessionSpawner,
    }

    fn harness(
        username: &str,
        provider: FakeProvider,
        reach: FakeReachability,
        config: SpawnerConfig,
    ) -> Harness {
        let provider = Arc::new(provider);
        let shares = Arc::new(FakeShares::default());
        let reach = Arc::new(reach);
        let identity = SessionIdentity::new(username, 7).unwrap();
        let spawner = SessionSpawner::new(
            identity,
            provider.clone(),
            shares.clone(),
            config,
        )
        .unwrap()
        .with_reachability(reach.clone());
        Harness {
            provider,
            shares,
            reach,
            spawner,
        }
    }

    #[tokio::test]
    async fn fresh_start_provisions_storage_creates_group_and_polls() {
        // No existing group, no share. Readiness arrives on poll attempt 4.
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::ready_after(4),
            test_config(),
        );

        let endpoint = h
            .spawner
            .start(&LaunchSpec::new(vec!["serve".to_string()]))
            .await
            .unwrap();

        assert_eq!(endpoint.address, "10.0.0.5");
        assert_eq!(endpoint.port, 80);
        assert_eq!(h.shares.create_calls(), 1);
        assert_eq!(h.provider.calls().create, 1);
        assert_eq!(h.reach.calls(), 4);
        assert_eq!(h.spawner.state().phase, SessionPhase::Ready);
        assert_eq!(h.spawner.state().endpoint, Some(endpoint));

        let spec = h.provider.last_spec().unwrap();
        assert_eq!(spec.volumes[0].share_name, "vol-alice");
        assert_eq!(spec.containers[0].name, "session-alice");
        assert_eq!(spec.containers[0].volume_mounts[0].name, "vol-alice");
    }

    #[tokio::test]
    async fn existing_healthy_group_is_reused_without_any_create() {
        let group = ready_group("z-session-bob", "10.0.0.8", 80);
        let h = harness(
            "bob",
            FakeProvider::with_group(group),
            FakeReachability::ready_after(1),
            test_config(),
        );

        let endpoint = h.spawner.start(&LaunchSpec::default()).await.unwrap();

        assert_eq!(endpoint.address, "10.0.0.8");
        assert_eq!(h.provider.calls().create, 0);
        assert_eq!(h.provider.calls().start, 1);
        // Reuse skips storage provisioning entirely.
        assert_eq!(h.shares.list_calls(), 0);
        assert_eq!(h.shares.create_calls(), 0);
        // Ready on the first readiness check.
        assert_eq!(h.reach.calls(), 1);
    }

    #[tokio::test]
    async fn failed_start_on_existing_group_falls_back_to_create() {
        let group = ready_group("z-session-carol", "10.0.0.9", 80);
        let provider = FakeProvider {
            fail_start: true,
            ..FakeProvider::with_group(group)
        };
        let h = harness(
            "carol",
            provider,
            FakeReachability::ready_after(1),
            test_config(),
        );

        h.spawner.start(&LaunchSpec::default()).await.unwrap();

        assert_eq!(h.provider.calls().start, 1);
        assert_eq!(h.provider.calls().create, 1);
        assert_eq!(h.shares.create_calls(), 1);
    }

    #[tokio::test]
    async fn three_transitioning_rejections_then_success() {
        let h = harness(
            "alice",
            FakeProvider::with_transitioning_rejections(3),
            FakeReachability::ready_after(1),
            test_config(),
        );

        h.spawner.start(&LaunchSpec::default()).await.unwrap();

        assert_eq!(h.provider.calls().create, 4);
    }

    #[tokio::test]
    async fn four_transitioning_rejections_are_fatal() {
        let h = harness(
            "alice",
            FakeProvider::with_transitioning_rejections(4),
            FakeReachability::ready_after(1),
            test_config(),
        );

        let err = h.spawner.start(&LaunchSpec::default()).await.unwrap_err();

        assert!(matches!(
            err,
            SpawnError::Provider(ProviderError::StillTransitioning(_))
        ));
        assert_eq!(h.provider.calls().create, 4);
        assert_eq!(h.spawner.state().phase, SessionPhase::Failed);
    }

    #[tokio::test]
    async fn spawn_times_out_after_exactly_the_attempt_budget() {
        // Provider states go green immediately but the socket never answers:
        // with a 300/10 budget the prober must run exactly 30 times.
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::never(),
            test_config(),
        );

        let err = h.spawner.start(&LaunchSpec::default()).await.unwrap_err();

        match err {
            SpawnError::SpawnTimeout { attempts, .. } => assert_eq!(attempts, 30),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(h.reach.calls(), 30);
        assert_eq!(h.spawner.state().phase, SessionPhase::TimedOut);
        assert!(h.spawner.state().endpoint.is_none());
    }

    #[tokio::test]
    async fn provider_failure_during_polling_is_fatal() {
        let provider = FakeProvider {
            fail_get: true,
            ..FakeProvider::default()
        };
        let h = harness(
            "alice",
            provider,
            FakeReachability::ready_after(1),
            test_config(),
        );

        let err = h.spawner.start(&LaunchSpec::default()).await.unwrap_err();

        assert!(matches!(err, SpawnError::Provider(ProviderError::Api { .. })));
        assert_eq!(h.spawner.state().phase, SessionPhase::Failed);
    }

    #[tokio::test]
    async fn path_augmentation_expands_and_prepends() {
        let mut config = test_config();
        config.extra_paths = vec![
            "/opt/{USERNAME}/bin".to_string(),
            "/data/{USERID}/tools".to_string(),
        ];
        config.extra_env =
            HashMap::from([("SESSION_FLAG".to_string(), "true".to_string())]);
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::ready_after(1),
            config,
        );

        let launch = LaunchSpec::new(vec!["serve".to_string()])
            .env("PATH", "/usr/bin:/bin");
        h.spawner.start(&launch).await.unwrap();

        let spec = h.provider.last_spec().unwrap();
        let env = &spec.containers[0].env;
        assert_eq!(
            env.get("PATH"),
            Some(&"/opt/alice/bin:/data/7/tools:/usr/bin:/bin".to_string())
        );
        assert_eq!(env.get("SESSION_FLAG"), Some(&"true".to_string()));
    }

    #[tokio::test]
    async fn path_augmentation_without_inherited_path() {
        let mut config = test_config();
        config.extra_paths = vec!["/opt/tools".to_string()];
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::ready_after(1),
            config,
        );

        h.spawner.start(&LaunchSpec::default()).await.unwrap();

        let spec = h.provider.last_spec().unwrap();
        assert_eq!(
            spec.containers[0].env.get("PATH"),
            Some(&"/opt/tools".to_string())
        );
    }

    #[tokio::test]
    async fn api_token_is_recovered_from_reused_group() {
        let mut group = ready_group("z-session-bob", "10.0.0.8", 80);
        group.containers[0]
            .env
            .insert("SESSION_API_TOKEN".to_string(), "tok-456".to_string());
        let h = harness(
            "bob",
            FakeProvider::with_group(group),
            FakeReachability::ready_after(1),
            test_config(),
        );

        h.spawner.start(&LaunchSpec::default()).await.unwrap();

        assert_eq!(h.spawner.state().api_token.as_deref(), Some("tok-456"));
    }

    #[tokio::test]
    async fn poll_reports_not_ready_with_sentinel() {
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::ready_after(1),
            test_config(),
        );

        // No group yet: not ready, no error.
        assert_eq!(h.spawner.poll().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn poll_reports_ready_as_none() {
        let group = ready_group("z-session-bob", "10.0.0.8", 80);
        let h = harness(
            "bob",
            FakeProvider::with_group(group),
            FakeReachability::ready_after(1),
            test_config(),
        );

        assert_eq!(h.spawner.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn poll_propagates_provider_lookup_failure() {
        let provider = FakeProvider {
            fail_get: true,
            ..FakeProvider::default()
        };
        let h = harness(
            "alice",
            provider,
            FakeReachability::ready_after(1),
            test_config(),
        );

        assert!(h.spawner.poll().await.is_err());
    }

    #[tokio::test]
    async fn stop_of_absent_group_succeeds_silently() {
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::never(),
            test_config(),
        );

        h.spawner.stop().await;

        assert_eq!(h.provider.calls().stop, 1);
    }

    #[tokio::test]
    async fn stop_suppresses_provider_failures() {
        let provider = FakeProvider {
            fail_stop: true,
            ..FakeProvider::with_group(ready_group("z-session-alice", "10.0.0.5", 80))
        };
        let h = harness(
            "alice",
            provider,
            FakeReachability::never(),
            test_config(),
        );

        h.spawner.stop().await;

        assert_eq!(h.provider.calls().stop, 1);
    }

    #[tokio::test]
    async fn teardown_deletes_group_but_never_the_share() {
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::ready_after(1),
            test_config(),
        );

        h.spawner.start(&LaunchSpec::default()).await.unwrap();
        h.spawner.teardown().await.unwrap();

        assert_eq!(h.provider.calls().delete, 1);
        // The share created during start is left alone; the store trait has
        // no delete and the fake still holds it.
        assert!(h.shares.existing.lock().unwrap().contains(&"vol-alice".to_string()));
        assert_eq!(h.spawner.state().phase, SessionPhase::Absent);
    }

    #[tokio::test]
    async fn teardown_of_absent_group_succeeds() {
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::never(),
            test_config(),
        );

        h.spawner.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn teardown_propagates_delete_failures() {
        let provider = FakeProvider {
            fail_delete: true,
            ..FakeProvider::with_group(ready_group("z-session-alice", "10.0.0.5", 80))
        };
        let h = harness(
            "alice",
            provider,
            FakeReachability::never(),
            test_config(),
        );

        let err = h.spawner.teardown().await.unwrap_err();
        assert!(matches!(err, StopError::Delete { .. }));
    }

    #[tokio::test]
    async fn state_snapshot_round_trips() {
        let h = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::ready_after(1),
            test_config(),
        );

        h.spawner.start(&LaunchSpec::default()).await.unwrap();
        let state = h.spawner.state();

        let h2 = harness(
            "alice",
            FakeProvider::default(),
            FakeReachability::never(),
            test_config(),
        );
        h2.spawner.restore_state(state.clone());
        assert_eq!(h2.spawner.state().phase, SessionPhase::Ready);
        assert_eq!(h2.spawner.state().endpoint, state.endpoint);
    }

    #[test]
    fn constructor_rejects_invalid_config() {
        let identity = SessionIdentity::new("alice", 7).unwrap();
        let provider: Arc<dyn ComputeProviderApi> = Arc::new(FakeProvider::default());
        let shares: Arc<dyn ShareStoreApi> = Arc::new(FakeShares::default());

        let result = SessionSpawner::new(
            identity,
            provider,
            shares,
            SpawnerConfig::default(),
        );
        assert!(result.is_err());
    }
}
