//! Container provisioner: provisions containers of one kind on the agent's
//! own machine.
//!
//! Unlike the environ provisioner it never watches environment
//! configuration, always runs its task with safe mode off, and has no retry
//! watcher. The agent's machine is resolved from its tag once and cached.

use std::sync::Arc;

use async_trait::async_trait;
use tether_names::{ContainerType, MachineTag};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span};

use crate::config::AgentConfig;
use crate::environs::InstanceBroker;
use crate::error::{Error, Result};
use crate::provisioner::{MachineSource, Provisioner, ProvisionerBase, ProvisionerKind};
use crate::state::{Machine, ProvisionerState};
use crate::task::{ProvisionerTask, TaskFactory};
use crate::watcher::{NotifyWatcher, StringsWatcher};
use crate::worker::{stop_worker, Lifecycle, Worker};

/// Provisioner for containers hosted on the agent's machine.
pub struct ContainerProvisioner {
    lifecycle: Arc<Lifecycle>,
    container_type: ContainerType,
}

impl ContainerProvisioner {
    /// Start the provisioner with an injected broker for `container_type`.
    pub fn start(
        container_type: ContainerType,
        state: Arc<dyn ProvisionerState>,
        agent_config: AgentConfig,
        broker: Arc<dyn InstanceBroker>,
        tasks: Arc<dyn TaskFactory>,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());

        let span = info_span!(
            "provisioner",
            kind = "container",
            container_type = %container_type,
            agent = %agent_config.tag,
        );
        span.in_scope(|| debug!("Starting container provisioner"));

        let container_loop = ContainerLoop {
            base: ProvisionerBase {
                state,
                agent_config,
                tasks,
            },
            container_type,
            broker,
            cancel: lifecycle.token(),
        };
        lifecycle.spawn(span, container_loop.run());

        Self {
            lifecycle,
            container_type,
        }
    }

    pub fn container_type(&self) -> ContainerType {
        self.container_type
    }
}

#[async_trait]
impl Worker for ContainerProvisioner {
    fn kill(&self) {
        self.lifecycle.kill();
    }

    async fn wait(&self) -> Result<()> {
        self.lifecycle.wait().await
    }

    fn err(&self) -> Result<()> {
        self.lifecycle.err()
    }
}

impl Provisioner for ContainerProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Container(self.container_type)
    }
}

// =============================================================================
// Loop
// =============================================================================

struct ContainerLoop {
    base: ProvisionerBase,
    container_type: ContainerType,
    broker: Arc<dyn InstanceBroker>,
    cancel: CancellationToken,
}

impl ContainerLoop {
    async fn run(self) -> Result<()> {
        let mut source = HostedContainers {
            state: Arc::clone(&self.base.state),
            agent_tag: self.base.agent_config.tag.clone(),
            container_type: self.container_type,
            machine: None,
        };
        let task = self
            .base
            .start_task(&mut source, Arc::clone(&self.broker), false)
            .await?;
        info!("Container provisioner running");

        let mut result = self.watch(task.as_ref()).await;
        stop_worker("provisioner task", task.as_ref(), &mut result).await;
        result
    }

    async fn watch(&self, task: &dyn ProvisionerTask) -> Result<()> {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Err(Error::Dying),

            outcome = task.wait() => match outcome {
                Ok(()) => {
                    info!("Provisioner task stopped");
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "{} provisioner died", self.container_type);
                    Err(e.annotate("provisioner task"))
                }
            },
        }
    }
}

/// Containers of one kind on the agent's machine.
struct HostedContainers {
    state: Arc<dyn ProvisionerState>,
    agent_tag: String,
    container_type: ContainerType,
    machine: Option<Arc<dyn Machine>>,
}

impl HostedContainers {
    async fn machine(&mut self) -> Result<Arc<dyn Machine>> {
        if let Some(machine) = &self.machine {
            return Ok(Arc::clone(machine));
        }

        let tag = MachineTag::parse(&self.agent_tag)?;
        let machine = self.state.machine(&tag).await.inspect_err(|e| {
            error!(agent = %self.agent_tag, error = %e, "Agent machine is not in state");
        })?;
        self.machine = Some(Arc::clone(&machine));
        Ok(machine)
    }
}

#[async_trait]
impl MachineSource for HostedContainers {
    async fn machine_watcher(&mut self) -> Result<Box<dyn StringsWatcher>> {
        let machine = self.machine().await?;
        machine.watch_containers(self.container_type).await
    }

    async fn retry_watcher(&mut self) -> Result<Box<dyn NotifyWatcher>> {
        Err(Error::NotImplemented("container retry watcher".to_string()))
    }
}
