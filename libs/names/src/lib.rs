//! # tether-names
//!
//! Typed entity tags and container kinds shared by the provisioner and the
//! agents that embed it.
//!
//! ## Tag Format
//!
//! Every tag is `{kind}-{suffix}`. The suffix is kind specific:
//!
//! - `machine-0` names top-level machine `0`
//! - `machine-0-lxc-1` names container `0/lxc/1` hosted on machine `0`
//! - `environment-4f2a9c1e` names an environment
//!
//! Tags are what agents are configured with; ids are what the state server
//! reports in watcher batches. `MachineTag` converts between the two.

mod error;
mod macros;
mod types;

pub use error::TagError;
pub use types::*;
