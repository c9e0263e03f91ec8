//! Fake environments and brokers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tether_provisioner::{
    Environ, EnvironConfig, EnvironProvider, Error, Instance, InstanceBroker, InstanceId, Result,
    StartInstanceParams,
};

use crate::lock;

/// Attribute that makes a configuration unacceptable to the fake environ.
pub const BROKEN_ATTR: &str = "broken";

fn is_broken(config: &EnvironConfig) -> bool {
    config
        .get(BROKEN_ATTR)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Broker keeping its instances in memory.
#[derive(Debug, Default)]
pub struct FakeBroker {
    instances: Mutex<Vec<Instance>>,
    next_id: AtomicU64,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instances(&self) -> Vec<Instance> {
        lock(&self.instances).clone()
    }
}

#[async_trait]
impl InstanceBroker for FakeBroker {
    async fn start_instance(&self, params: StartInstanceParams) -> Result<Instance> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let instance = Instance {
            id: InstanceId(format!("i-{id}")),
            machine_id: params.machine_id,
        };
        lock(&self.instances).push(instance.clone());
        Ok(instance)
    }

    async fn stop_instances(&self, ids: &[InstanceId]) -> Result<()> {
        lock(&self.instances).retain(|instance| !ids.contains(&instance.id));
        Ok(())
    }

    async fn all_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.instances())
    }
}

/// Environment of type `dummy`.
#[derive(Debug)]
pub struct FakeEnviron {
    config: Mutex<EnvironConfig>,
    broker: FakeBroker,
    applied: Mutex<Vec<EnvironConfig>>,
}

impl FakeEnviron {
    pub fn new(config: EnvironConfig) -> Self {
        Self {
            config: Mutex::new(config),
            broker: FakeBroker::new(),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Configurations accepted by `set_config`, in order.
    pub fn applied(&self) -> Vec<EnvironConfig> {
        lock(&self.applied).clone()
    }
}

#[async_trait]
impl InstanceBroker for FakeEnviron {
    async fn start_instance(&self, params: StartInstanceParams) -> Result<Instance> {
        self.broker.start_instance(params).await
    }

    async fn stop_instances(&self, ids: &[InstanceId]) -> Result<()> {
        self.broker.stop_instances(ids).await
    }

    async fn all_instances(&self) -> Result<Vec<Instance>> {
        self.broker.all_instances().await
    }
}

impl Environ for FakeEnviron {
    fn name(&self) -> String {
        lock(&self.config).name().to_string()
    }

    fn config(&self) -> EnvironConfig {
        lock(&self.config).clone()
    }

    fn set_config(&self, config: &EnvironConfig) -> Result<()> {
        if is_broken(config) {
            return Err(Error::InvalidConfig(format!(
                "environment {:?} is broken",
                config.name()
            )));
        }
        *lock(&self.config) = config.clone();
        lock(&self.applied).push(config.clone());
        Ok(())
    }
}

/// Opens [`FakeEnviron`]s for `dummy` configurations that are not broken.
#[derive(Debug, Default)]
pub struct FakeEnvironProvider {
    opened: Mutex<Vec<Arc<FakeEnviron>>>,
    rejected: AtomicU64,
}

impl FakeEnvironProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_opened(&self) -> Option<Arc<FakeEnviron>> {
        lock(&self.opened).last().cloned()
    }

    pub fn opened_count(&self) -> usize {
        lock(&self.opened).len()
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EnvironProvider for FakeEnvironProvider {
    async fn open(&self, config: &EnvironConfig) -> Result<Arc<dyn Environ>> {
        if config.environ_type() != "dummy" || is_broken(config) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::InvalidConfig(format!(
                "cannot open {:?} environment {:?}",
                config.environ_type(),
                config.name()
            )));
        }

        let environ = Arc::new(FakeEnviron::new(config.clone()));
        lock(&self.opened).push(Arc::clone(&environ));
        Ok(environ)
    }
}
