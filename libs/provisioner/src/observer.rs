//! Environment configuration observer.
//!
//! Diagnostics and tests register a channel to see every configuration the
//! environ provisioner successfully applied. Provisioning decisions never
//! depend on it.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EnvironConfig;

/// Single-slot registration for applied configuration notifications.
#[derive(Debug, Default)]
pub struct ConfigObserver {
    observer: Mutex<Option<mpsc::Sender<EnvironConfig>>>,
}

impl ConfigObserver {
    /// Create an observer with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (`Some`) or clear (`None`) the notification channel.
    pub async fn set(&self, observer: Option<mpsc::Sender<EnvironConfig>>) {
        *self.observer.lock().await = observer;
    }

    /// Send `config` to the registered channel, if any.
    ///
    /// The sender is cloned out of the lock before sending, so a slow
    /// observer never blocks `set`. Order is kept because only the owning
    /// loop notifies. Returns false if `cancel` fired before the observer
    /// took the config.
    pub async fn notify(&self, config: EnvironConfig, cancel: &CancellationToken) -> bool {
        let registered = self.observer.lock().await.clone();
        let Some(tx) = registered else {
            return true;
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => false,

            sent = tx.send(config) => {
                if sent.is_err() {
                    debug!("Config observer went away");
                }
                true
            }
        }
    }
}
