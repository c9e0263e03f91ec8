//! Behaviour shared by the environ and container provisioners.
//!
//! Both variants run the same skeleton: acquire watchers, start one
//! provisioning task, select until cancelled or the task dies, then tear the
//! task down. What differs is where machines come from, which the variants
//! express through [`MachineSource`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tether_names::ContainerType;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::environs::InstanceBroker;
use crate::error::Result;
use crate::state::ProvisionerState;
use crate::task::{ProvisionerTask, TaskFactory, TaskParams};
use crate::watcher::{NotifyWatcher, StringsWatcher};
use crate::worker::Worker;

/// Which topology a provisioner serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionerKind {
    /// Machines of the whole environment.
    Environ,
    /// Containers of one kind on the agent's own machine.
    Container(ContainerType),
}

impl fmt::Display for ProvisionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionerKind::Environ => f.write_str("environ"),
            ProvisionerKind::Container(container_type) => write!(f, "{container_type}"),
        }
    }
}

/// A running provisioner.
pub trait Provisioner: Worker {
    fn kind(&self) -> ProvisionerKind;
}

/// Variant-specific watcher acquisition.
#[async_trait]
pub(crate) trait MachineSource: Send {
    /// Watcher over the machines this provisioner is responsible for.
    async fn machine_watcher(&mut self) -> Result<Box<dyn StringsWatcher>>;

    /// Watcher over error-retry requests. `NotImplemented` means the variant
    /// or backend has no retry support.
    async fn retry_watcher(&mut self) -> Result<Box<dyn NotifyWatcher>>;
}

/// Collaborators every provisioner loop holds.
#[derive(Clone)]
pub(crate) struct ProvisionerBase {
    pub(crate) state: Arc<dyn ProvisionerState>,
    pub(crate) agent_config: AgentConfig,
    pub(crate) tasks: Arc<dyn TaskFactory>,
}

impl ProvisionerBase {
    /// Acquire the authenticator and watchers and start the task.
    pub(crate) async fn start_task(
        &self,
        source: &mut dyn MachineSource,
        broker: Arc<dyn InstanceBroker>,
        safe_mode: bool,
    ) -> Result<Box<dyn ProvisionerTask>> {
        let auth = self.state.api_authenticator().await?;
        let machine_watcher = source.machine_watcher().await?;

        let retry_watcher = match source.retry_watcher().await {
            Ok(watcher) => Some(watcher),
            Err(e) if e.is_not_implemented() => {
                debug!("Retry watcher not supported, provisioning without it");
                None
            }
            Err(e) => {
                if let Err(stop_err) = machine_watcher.stop().await {
                    warn!(error = %stop_err, "Failed to stop machine watcher");
                }
                return Err(e);
            }
        };

        debug!(
            safe_mode,
            retry = retry_watcher.is_some(),
            "Starting provisioner task"
        );

        Ok(self.tasks.start_task(TaskParams {
            agent_tag: self.agent_config.tag.clone(),
            safe_mode,
            state: Arc::clone(&self.state),
            machine_watcher,
            retry_watcher,
            broker,
            auth,
        }))
    }
}
