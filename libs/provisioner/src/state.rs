//! State client contract.
//!
//! The provisioners consume the machine registry through these traits. The
//! transport behind them (API connection, server-side watchers) lives in the
//! agent that embeds this crate.

use std::sync::Arc;

use async_trait::async_trait;
use tether_names::{ContainerType, MachineTag};

use crate::config::EnvironConfig;
use crate::error::Result;
use crate::watcher::{NotifyWatcher, StringsWatcher};

/// Provisioner-facing view of the state server.
#[async_trait]
pub trait ProvisionerState: Send + Sync {
    /// Current environment configuration.
    async fn environ_config(&self) -> Result<EnvironConfig>;

    /// Ticks whenever the environment configuration changes. The first tick
    /// is delivered immediately.
    async fn watch_for_environ_config_changes(&self) -> Result<Box<dyn NotifyWatcher>>;

    /// Batches of top-level machine ids whose lifecycle changed.
    async fn watch_environ_machines(&self) -> Result<Box<dyn StringsWatcher>>;

    /// Ticks when machines in an error state should be retried. Backends
    /// without retry support return [`crate::Error::NotImplemented`].
    async fn watch_machine_error_retry(&self) -> Result<Box<dyn NotifyWatcher>>;

    /// Look up a machine by tag.
    async fn machine(&self, tag: &MachineTag) -> Result<Arc<dyn Machine>>;

    /// Authenticator the provisioning task uses to hand credentials to the
    /// instances it starts.
    async fn api_authenticator(&self) -> Result<Arc<dyn AuthenticationProvider>>;
}

/// A machine known to state.
#[async_trait]
pub trait Machine: Send + Sync {
    fn tag(&self) -> &MachineTag;

    /// Batches of container ids of `container_type` hosted on this machine.
    async fn watch_containers(
        &self,
        container_type: ContainerType,
    ) -> Result<Box<dyn StringsWatcher>>;
}

/// Connection details handed to a freshly started instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiInfo {
    pub addrs: Vec<String>,
    pub ca_cert: String,
    pub tag: MachineTag,
    pub nonce: String,
}

/// Produces credentials for machines the provisioning task starts.
pub trait AuthenticationProvider: Send + Sync {
    fn setup_authentication(&self, machine: &MachineTag, nonce: &str) -> Result<ApiInfo>;
}
