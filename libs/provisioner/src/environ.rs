//! Environ provisioner: provisions instances for every machine in the
//! environment.
//!
//! ## Loop
//!
//! ```text
//! initializing: watch config -> wait for environ -> read safe mode
//!               -> authenticator -> machine watcher -> retry watcher -> task
//! running:      select { cancelled | task died | config tick }
//! terminating:  stop task, stop config watcher, latch outcome
//! ```
//!
//! A config tick re-reads the configuration and applies it to the opened
//! environ. A configuration the environ rejects is logged and the loop keeps
//! going on the previous one; the freshly read safe-mode flag is forwarded to
//! the task either way.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span};

use crate::config::{AgentConfig, EnvironConfig};
use crate::environs::{wait_for_environ, Environ, EnvironProvider, InstanceBroker};
use crate::error::{Error, Result};
use crate::observer::ConfigObserver;
use crate::provisioner::{MachineSource, Provisioner, ProvisionerBase, ProvisionerKind};
use crate::state::ProvisionerState;
use crate::task::{ProvisionerTask, TaskFactory};
use crate::watcher::{watcher_error, NotifyWatcher, StringsWatcher};
use crate::worker::{stop_worker, Lifecycle, Worker};

/// Provisioner for the machines of a whole environment.
pub struct EnvironProvisioner {
    lifecycle: Arc<Lifecycle>,
    observer: Arc<ConfigObserver>,
}

impl EnvironProvisioner {
    /// Start the provisioner. The broker is the environ opened by `provider`
    /// from the first valid configuration state serves.
    pub fn start(
        state: Arc<dyn ProvisionerState>,
        agent_config: AgentConfig,
        tasks: Arc<dyn TaskFactory>,
        provider: Arc<dyn EnvironProvider>,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        let observer = Arc::new(ConfigObserver::new());

        let span = info_span!("provisioner", kind = "environ", agent = %agent_config.tag);
        span.in_scope(|| debug!("Starting environ provisioner"));

        let environ_loop = EnvironLoop {
            base: ProvisionerBase {
                state,
                agent_config,
                tasks,
            },
            provider,
            observer: Arc::clone(&observer),
            cancel: lifecycle.token(),
        };
        lifecycle.spawn(span, environ_loop.run());

        Self {
            lifecycle,
            observer,
        }
    }

    /// Register (or clear) a channel receiving every applied configuration.
    pub async fn set_config_observer(&self, observer: Option<mpsc::Sender<EnvironConfig>>) {
        self.observer.set(observer).await;
    }
}

#[async_trait]
impl Worker for EnvironProvisioner {
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

impl Provisioner for EnvironProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Environ
    }
}

// =============================================================================
// Loop
// =============================================================================

struct EnvironLoop {
    base: ProvisionerBase,
    provider: Arc<dyn EnvironProvider>,
    observer: Arc<ConfigObserver>,
    cancel: CancellationToken,
}

impl EnvironLoop {
    async fn run(self) -> Result<()> {
        let mut config_watcher = self.base.state.watch_for_environ_config_changes().await?;

        let mut result = self.run_with_watcher(config_watcher.as_mut()).await;
        stop_worker("environ config watcher", config_watcher.as_ref(), &mut result).await;
        result
    }

    async fn run_with_watcher(&self, config_watcher: &mut dyn NotifyWatcher) -> Result<()> {
        let environ = wait_for_environ(
            config_watcher,
            self.base.state.as_ref(),
            self.provider.as_ref(),
            &self.cancel,
        )
        .await?;

        let safe_mode = environ.config().provisioner_safe_mode();
        let broker: Arc<dyn InstanceBroker> = environ.clone();
        let mut source = EnvironMachines {
            state: Arc::clone(&self.base.state),
        };
        let task = self.base.start_task(&mut source, broker, safe_mode).await?;
        info!(safe_mode, "Environ provisioner running");

        let mut result = self
            .watch(config_watcher, environ.as_ref(), task.as_ref())
            .await;
        stop_worker("provisioner task", task.as_ref(), &mut result).await;
        result
    }

    async fn watch(
        &self,
        config_watcher: &mut dyn NotifyWatcher,
        environ: &dyn Environ,
        task: &dyn ProvisionerTask,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Err(Error::Dying),

                outcome = task.wait() => {
                    return match outcome {
                        Ok(()) => {
                            info!("Provisioner task stopped");
                            Ok(())
                        }
                        Err(e) => {
                            error!(error = %e, "Environ provisioner died");
                            Err(e.annotate("provisioner task"))
                        }
                    };
                }

                change = config_watcher.next() => {
                    if change.is_none() {
                        return Err(watcher_error("environ config watcher", &*config_watcher).await);
                    }
                    let config = self.base.state.environ_config().await.map_err(|e| {
                        error!(error = %e, "Cannot load environment configuration");
                        e
                    })?;
                    self.apply_config(environ, &config).await?;
                    task.set_safe_mode(config.provisioner_safe_mode());
                }
            }
        }
    }

    /// Apply `config` to the environ. A rejected config is logged and kept
    /// out of the observer; only cancellation fails.
    async fn apply_config(&self, environ: &dyn Environ, config: &EnvironConfig) -> Result<()> {
        if let Err(e) = environ.set_config(config) {
            error!(error = %e, "Loaded invalid environment configuration");
            return Ok(());
        }

        debug!(safe_mode = config.provisioner_safe_mode(), "Environment configuration applied");
        if !self.observer.notify(config.clone(), &self.cancel).await {
            return Err(Error::Dying);
        }
        Ok(())
    }
}

struct EnvironMachines {
    state: Arc<dyn ProvisionerState>,
}

#[async_trait]
impl MachineSource for EnvironMachines {
    async fn machine_watcher(&mut self) -> Result<Box<dyn StringsWatcher>> {
        self.state.watch_environ_machines().await
    }

    async fn retry_watcher(&mut self) -> Result<Box<dyn NotifyWatcher>> {
        self.state.watch_machine_error_retry().await
    }
}
