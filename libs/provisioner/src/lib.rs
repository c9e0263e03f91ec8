//! tether provisioner
//!
//! Supervised control loops that keep an environment's cloud instances in
//! sync with the machine registry. An agent runs one environ provisioner
//! (whole environment) and zero or more container provisioners (containers
//! of one kind on the agent's own machine). Each provisioner starts a single
//! provisioning task and supervises it.
//!
//! ## Architecture
//!
//! ```text
//! ProvisionerSet
//! ├── EnvironProvisioner        (config watcher, environ, safe mode)
//! │   └── ProvisionerTask       (machine watcher, retry watcher, broker)
//! └── ContainerProvisioner(kind)
//!     └── ProvisionerTask       (container watcher, injected broker)
//! ```
//!
//! ## Modules
//!
//! - `worker`: kill/wait/err lifecycle shared by every worker
//! - `watcher`, `state`, `environs`, `task`: contracts of external collaborators
//! - `environ`, `container`: the two provisioner variants
//! - `set`: the provisioners of one agent
//! - `config`, `observer`: agent and environment configuration
//! - `telemetry`: JSON tracing setup for embedding agents

pub mod config;
pub mod container;
pub mod environ;
pub mod environs;
pub mod error;
pub mod observer;
pub mod provisioner;
pub mod set;
pub mod state;
pub mod task;
pub mod telemetry;
pub mod watcher;
pub mod worker;

// Re-export commonly used types
pub use config::{AgentConfig, EnvironConfig};
pub use container::ContainerProvisioner;
pub use environ::EnvironProvisioner;
pub use environs::{Environ, EnvironProvider, Instance, InstanceBroker, InstanceId, StartInstanceParams};
pub use error::{Error, Result};
pub use provisioner::{Provisioner, ProvisionerKind};
pub use set::{Collaborators, ProvisionerSet};
pub use state::{ApiInfo, AuthenticationProvider, Machine, ProvisionerState};
pub use task::{ProvisionerTask, TaskFactory, TaskParams};
pub use watcher::{NotifyWatcher, StringsWatcher};
pub use worker::{Lifecycle, LifecycleState, Worker};
