//! Fake state client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tether_names::{ContainerType, MachineTag};
use tether_provisioner::watcher::{channel, ChannelWatcher, WatcherSender};
use tether_provisioner::{
    ApiInfo, AuthenticationProvider, EnvironConfig, Error, Machine, NotifyWatcher,
    ProvisionerState, Result, StringsWatcher,
};

use crate::lock;

const CAPACITY: usize = 16;

/// How the fake backend answers `watch_machine_error_retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrySupport {
    Supported,
    NotImplemented,
    Fails(Error),
}

/// In-memory state client.
///
/// Each watcher can be taken once; the matching sender stays with the fake
/// so tests can push changes or fail the stream.
pub struct FakeState {
    config: Mutex<EnvironConfig>,
    config_fetch_error: Mutex<Option<Error>>,
    auth_error: Mutex<Option<Error>>,
    config_watch_error: Mutex<Option<Error>>,
    machines_watch_error: Mutex<Option<Error>>,
    retry_support: Mutex<RetrySupport>,
    machines: Mutex<HashMap<MachineTag, Arc<FakeMachine>>>,
    calls: Mutex<Vec<&'static str>>,

    config_changes: WatcherSender<()>,
    config_watcher: Mutex<Option<ChannelWatcher<()>>>,
    machine_changes: WatcherSender<Vec<String>>,
    machine_watcher: Mutex<Option<ChannelWatcher<Vec<String>>>>,
    retry_changes: WatcherSender<()>,
    retry_watcher: Mutex<Option<ChannelWatcher<()>>>,
}

impl FakeState {
    /// State serving `config`. The config watcher starts with one pending tick,
    /// like a real watcher's initial event.
    pub fn new(config: EnvironConfig) -> Self {
        let (config_changes, config_watcher) = channel(CAPACITY);
        let (machine_changes, machine_watcher) = channel(CAPACITY);
        let (retry_changes, retry_watcher) = channel(CAPACITY);
        config_changes.try_send(());

        Self {
            config: Mutex::new(config),
            config_fetch_error: Mutex::new(None),
            auth_error: Mutex::new(None),
            config_watch_error: Mutex::new(None),
            machines_watch_error: Mutex::new(None),
            retry_support: Mutex::new(RetrySupport::Supported),
            machines: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            config_changes,
            config_watcher: Mutex::new(Some(config_watcher)),
            machine_changes,
            machine_watcher: Mutex::new(Some(machine_watcher)),
            retry_changes,
            retry_watcher: Mutex::new(Some(retry_watcher)),
        }
    }

    pub fn with_retry_support(self, support: RetrySupport) -> Self {
        *lock(&self.retry_support) = support;
        self
    }

    pub fn with_machine(self, machine: FakeMachine) -> Self {
        lock(&self.machines).insert(machine.tag().clone(), Arc::new(machine));
        self
    }

    pub fn machine_fake(&self, tag: &MachineTag) -> Option<Arc<FakeMachine>> {
        lock(&self.machines).get(tag).cloned()
    }

    /// Replace the served configuration without ticking the watcher.
    pub fn set_environ_config(&self, config: EnvironConfig) {
        *lock(&self.config) = config;
    }

    /// Replace the served configuration and tick the config watcher.
    pub async fn change_environ_config(&self, config: EnvironConfig) {
        self.set_environ_config(config);
        self.config_changes.send(()).await;
    }

    /// Make `environ_config` fail (or succeed again with `None`).
    pub fn fail_environ_config(&self, err: Option<Error>) {
        *lock(&self.config_fetch_error) = err;
    }

    pub fn fail_api_authenticator(&self, err: Option<Error>) {
        *lock(&self.auth_error) = err;
    }

    /// Make `watch_for_environ_config_changes` fail.
    pub fn fail_config_watch(&self, err: Option<Error>) {
        *lock(&self.config_watch_error) = err;
    }

    /// Make `watch_environ_machines` fail.
    pub fn fail_machines_watch(&self, err: Option<Error>) {
        *lock(&self.machines_watch_error) = err;
    }

    pub fn config_changes(&self) -> &WatcherSender<()> {
        &self.config_changes
    }

    pub fn machine_changes(&self) -> &WatcherSender<Vec<String>> {
        &self.machine_changes
    }

    pub fn retry_changes(&self) -> &WatcherSender<()> {
        &self.retry_changes
    }

    /// Names of the state calls made so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    fn take<T>(slot: &Mutex<Option<T>>, name: &str) -> Result<T> {
        lock(slot)
            .take()
            .ok_or_else(|| Error::State(format!("{name} already taken")))
    }
}

#[async_trait]
impl ProvisionerState for FakeState {
    async fn environ_config(&self) -> Result<EnvironConfig> {
        self.record("environ_config");
        if let Some(err) = lock(&self.config_fetch_error).clone() {
            return Err(err);
        }
        Ok(lock(&self.config).clone())
    }

    async fn watch_for_environ_config_changes(&self) -> Result<Box<dyn NotifyWatcher>> {
        self.record("watch_for_environ_config_changes");
        if let Some(err) = lock(&self.config_watch_error).clone() {
            return Err(err);
        }
        let watcher = Self::take(&self.config_watcher, "environ config watcher")?;
        Ok(Box::new(watcher))
    }

    async fn watch_environ_machines(&self) -> Result<Box<dyn StringsWatcher>> {
        self.record("watch_environ_machines");
        if let Some(err) = lock(&self.machines_watch_error).clone() {
            return Err(err);
        }
        let watcher = Self::take(&self.machine_watcher, "environ machines watcher")?;
        Ok(Box::new(watcher))
    }

    async fn watch_machine_error_retry(&self) -> Result<Box<dyn NotifyWatcher>> {
        self.record("watch_machine_error_retry");
        let support = lock(&self.retry_support).clone();
        match support {
            RetrySupport::Supported => {
                let watcher = Self::take(&self.retry_watcher, "retry watcher")?;
                Ok(Box::new(watcher))
            }
            RetrySupport::NotImplemented => {
                Err(Error::NotImplemented("machine error retry watcher".to_string()))
            }
            RetrySupport::Fails(err) => Err(err),
        }
    }

    async fn machine(&self, tag: &MachineTag) -> Result<Arc<dyn Machine>> {
        self.record("machine");
        match lock(&self.machines).get(tag) {
            Some(machine) => {
                let machine: Arc<dyn Machine> = machine.clone();
                Ok(machine)
            }
            None => Err(Error::NotFound(format!("machine {}", tag.id()))),
        }
    }

    async fn api_authenticator(&self) -> Result<Arc<dyn AuthenticationProvider>> {
        self.record("api_authenticator");
        if let Some(err) = lock(&self.auth_error).clone() {
            return Err(err);
        }
        Ok(Arc::new(FakeAuthenticator::default()))
    }
}

// =============================================================================
// Machines
// =============================================================================

/// A machine hosting containers of every kind.
pub struct FakeMachine {
    tag: MachineTag,
    senders: HashMap<ContainerType, WatcherSender<Vec<String>>>,
    watchers: Mutex<HashMap<ContainerType, ChannelWatcher<Vec<String>>>>,
    watched: Mutex<Vec<ContainerType>>,
    watch_error: Mutex<Option<Error>>,
}

impl FakeMachine {
    pub fn new(tag: MachineTag) -> Self {
        let mut senders = HashMap::new();
        let mut watchers = HashMap::new();
        for container_type in ContainerType::ALL {
            let (tx, watcher) = channel(CAPACITY);
            senders.insert(container_type, tx);
            watchers.insert(container_type, watcher);
        }

        Self {
            tag,
            senders,
            watchers: Mutex::new(watchers),
            watched: Mutex::new(Vec::new()),
            watch_error: Mutex::new(None),
        }
    }

    /// Sender feeding the container watcher of `container_type`.
    pub fn container_changes(&self, container_type: ContainerType) -> &WatcherSender<Vec<String>> {
        &self.senders[&container_type]
    }

    /// Make `watch_containers` fail.
    pub fn fail_container_watch(&self, err: Option<Error>) {
        *lock(&self.watch_error) = err;
    }

    /// Container kinds watched so far, in order.
    pub fn watched(&self) -> Vec<ContainerType> {
        lock(&self.watched).clone()
    }
}

#[async_trait]
impl Machine for FakeMachine {
    fn tag(&self) -> &MachineTag {
        &self.tag
    }

    async fn watch_containers(
        &self,
        container_type: ContainerType,
    ) -> Result<Box<dyn StringsWatcher>> {
        lock(&self.watched).push(container_type);
        if let Some(err) = lock(&self.watch_error).clone() {
            return Err(err);
        }
        let watcher = lock(&self.watchers).remove(&container_type).ok_or_else(|| {
            Error::State(format!("{container_type} containers already watched"))
        })?;
        Ok(Box::new(watcher))
    }
}

// =============================================================================
// Authentication
// =============================================================================

/// Hands out fixed API addresses.
#[derive(Debug, Clone)]
pub struct FakeAuthenticator {
    pub addrs: Vec<String>,
    pub ca_cert: String,
}

impl Default for FakeAuthenticator {
    fn default() -> Self {
        Self {
            addrs: vec!["10.0.0.1:17070".to_string()],
            ca_cert: "fake-ca-cert".to_string(),
        }
    }
}

impl AuthenticationProvider for FakeAuthenticator {
    fn setup_authentication(&self, machine: &MachineTag, nonce: &str) -> Result<ApiInfo> {
        Ok(ApiInfo {
            addrs: self.addrs.clone(),
            ca_cert: self.ca_cert.clone(),
            tag: machine.clone(),
            nonce: nonce.to_string(),
        })
    }
}
