//! Environment and instance broker contracts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::EnvironConfig;
use crate::error::{Error, Result};
use crate::state::ProvisionerState;
use crate::watcher::{watcher_error, NotifyWatcher};

/// Provider-assigned instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A running cloud instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    /// Machine the instance was started for.
    pub machine_id: String,
}

/// Request to start an instance for a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartInstanceParams {
    pub machine_id: String,
    pub nonce: String,
    pub constraints: Option<String>,
}

/// Capability to create and destroy instances.
///
/// The provisioner only hands the broker to its task; it never calls it.
#[async_trait]
pub trait InstanceBroker: Send + Sync {
    async fn start_instance(&self, params: StartInstanceParams) -> Result<Instance>;

    async fn stop_instances(&self, ids: &[InstanceId]) -> Result<()>;

    async fn all_instances(&self) -> Result<Vec<Instance>>;
}

/// An opened environment: a broker plus its live configuration.
pub trait Environ: InstanceBroker {
    fn name(&self) -> String;

    fn config(&self) -> EnvironConfig;

    /// Replace the configuration. Rejected configs leave the old one in place.
    fn set_config(&self, config: &EnvironConfig) -> Result<()>;
}

/// Opens environments from configuration.
#[async_trait]
pub trait EnvironProvider: Send + Sync {
    async fn open(&self, config: &EnvironConfig) -> Result<Arc<dyn Environ>>;
}

/// Block until the environment configuration is valid enough to open.
///
/// Each tick of `watcher` re-reads the configuration; configurations the
/// provider rejects are logged and the wait continues.
pub async fn wait_for_environ(
    watcher: &mut dyn NotifyWatcher,
    state: &dyn ProvisionerState,
    provider: &dyn EnvironProvider,
    cancel: &CancellationToken,
) -> Result<Arc<dyn Environ>> {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(Error::Dying),

            change = watcher.next() => {
                if change.is_none() {
                    return Err(watcher_error("environ config watcher", &*watcher).await);
                }

                let config = state.environ_config().await?;
                match provider.open(&config).await {
                    Ok(environ) => {
                        debug!(environ = %environ.name(), "Environment opened");
                        return Ok(environ);
                    }
                    Err(e) => {
                        error!(error = %e, "Loaded invalid environment configuration");
                    }
                }
            }
        }
    }
}
