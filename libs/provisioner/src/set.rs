//! The provisioners one agent hosts.
//!
//! An agent runs at most one environ provisioner and one container
//! provisioner per container kind. The set runs until shutdown is signalled
//! or any member dies, then stops every member. Restarting is the agent's
//! business.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::select_all;
use tether_names::ContainerType;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::container::ContainerProvisioner;
use crate::environ::EnvironProvisioner;
use crate::environs::{EnvironProvider, InstanceBroker};
use crate::error::Result;
use crate::provisioner::{Provisioner, ProvisionerKind};
use crate::state::ProvisionerState;
use crate::task::TaskFactory;
use crate::worker::stop_worker;

/// External collaborators the set wires into each provisioner.
#[derive(Clone)]
pub struct Collaborators {
    pub state: Arc<dyn ProvisionerState>,
    pub tasks: Arc<dyn TaskFactory>,
    pub environ_provider: Arc<dyn EnvironProvider>,
    pub container_brokers: HashMap<ContainerType, Arc<dyn InstanceBroker>>,
}

/// Running provisioners of one agent.
#[derive(Default)]
pub struct ProvisionerSet {
    provisioners: Vec<Box<dyn Provisioner>>,
}

impl ProvisionerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the provisioners `agent_config` asks for.
    ///
    /// Container kinds without a broker are skipped with a warning.
    pub fn start(agent_config: &AgentConfig, collaborators: &Collaborators) -> Self {
        let mut set = Self::new();

        if agent_config.manage_environ {
            set.push(Box::new(EnvironProvisioner::start(
                Arc::clone(&collaborators.state),
                agent_config.clone(),
                Arc::clone(&collaborators.tasks),
                Arc::clone(&collaborators.environ_provider),
            )));
        }

        for container_type in &agent_config.container_types {
            let Some(broker) = collaborators.container_brokers.get(container_type) else {
                warn!(
                    container_type = %container_type,
                    "No broker for container type, not provisioning it"
                );
                continue;
            };
            set.push(Box::new(ContainerProvisioner::start(
                *container_type,
                Arc::clone(&collaborators.state),
                agent_config.clone(),
                Arc::clone(broker),
                Arc::clone(&collaborators.tasks),
            )));
        }

        info!(
            agent = %agent_config.tag,
            count = set.len(),
            "Provisioners started"
        );
        set
    }

    /// Add an already running provisioner.
    pub fn push(&mut self, provisioner: Box<dyn Provisioner>) {
        self.provisioners.push(provisioner);
    }

    pub fn len(&self) -> usize {
        self.provisioners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provisioners.is_empty()
    }

    pub fn kinds(&self) -> Vec<ProvisionerKind> {
        self.provisioners.iter().map(|p| p.kind()).collect()
    }

    /// Run until `shutdown` turns true or a provisioner dies, then stop all.
    ///
    /// Returns the first provisioner error, annotated with its kind.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let died = if self.provisioners.is_empty() {
            let _ = shutdown.wait_for(|stop| *stop).await;
            None
        } else {
            let waits = self.provisioners.iter().map(|p| p.wait());
            tokio::select! {
                biased;

                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Provisioner set received shutdown signal");
                    None
                }

                (outcome, index, _) = select_all(waits) => Some((index, outcome)),
            }
        };

        let mut result = match died {
            Some((index, outcome)) => {
                let kind = self.provisioners[index].kind();
                if let Err(e) = &outcome {
                    error!(provisioner = %kind, error = %e, "Provisioner died");
                } else {
                    info!(provisioner = %kind, "Provisioner stopped");
                }
                outcome.map_err(|e| e.annotate(format!("{kind} provisioner")))
            }
            None => Ok(()),
        };

        for provisioner in &self.provisioners {
            let name = format!("{} provisioner", provisioner.kind());
            stop_worker(&name, provisioner.as_ref(), &mut result).await;
        }

        result
    }
}
