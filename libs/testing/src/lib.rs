//! In-memory collaborators for provisioner tests.
//!
//! Every fake hands the test a way to drive it: watcher senders to push
//! changes or fail the stream, a view of each started task, and
//! switches to make state calls fail.

mod environ;
mod state;
mod task;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use environ::{FakeBroker, FakeEnviron, FakeEnvironProvider, BROKEN_ATTR};
pub use state::{FakeAuthenticator, FakeMachine, FakeState, RetrySupport};
pub use task::{FakeTaskFactory, StartedTask};

use serde_json::json;
use tether_provisioner::EnvironConfig;

/// A valid configuration for the fake provider.
pub fn dummy_config(name: &str, safe_mode: bool) -> EnvironConfig {
    EnvironConfig::from_value(json!({
        "name": name,
        "type": "dummy",
        "provisioner-safe-mode": safe_mode,
    }))
    .unwrap_or_else(|e| panic!("dummy config is valid: {e}"))
}

/// A configuration the fake provider and environ reject, but which state
/// serves happily.
pub fn broken_config(name: &str, safe_mode: bool) -> EnvironConfig {
    EnvironConfig::from_value(json!({
        "name": name,
        "type": "dummy",
        "provisioner-safe-mode": safe_mode,
        "broken": true,
    }))
    .unwrap_or_else(|e| panic!("broken config is well formed: {e}"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
