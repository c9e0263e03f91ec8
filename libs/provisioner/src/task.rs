//! Provisioning task contract.
//!
//! The task is the worker that actually compares machines with instances and
//! calls the broker. Provisioners start exactly one, forward safe-mode
//! changes to it, and die with it.

use std::sync::Arc;

use crate::environs::InstanceBroker;
use crate::state::{AuthenticationProvider, ProvisionerState};
use crate::watcher::{NotifyWatcher, StringsWatcher};
use crate::worker::Worker;

/// A running provisioning task.
pub trait ProvisionerTask: Worker {
    /// Toggle whether instances unknown to state may be destroyed. Safe to
    /// call at any time, from any thread.
    fn set_safe_mode(&self, safe_mode: bool);
}

/// Everything a task is started with. The task owns the watchers.
pub struct TaskParams {
    /// Identity of the owning agent.
    pub agent_tag: String,
    pub safe_mode: bool,
    pub state: Arc<dyn ProvisionerState>,
    pub machine_watcher: Box<dyn StringsWatcher>,
    pub retry_watcher: Option<Box<dyn NotifyWatcher>>,
    pub broker: Arc<dyn InstanceBroker>,
    pub auth: Arc<dyn AuthenticationProvider>,
}

/// Starts provisioning tasks.
///
/// Starting cannot fail: the task owns its watchers from here on, and a task
/// that cannot run reports that by dying, stopping the watchers on its way out.
pub trait TaskFactory: Send + Sync {
    fn start_task(&self, params: TaskParams) -> Box<dyn ProvisionerTask>;
}
