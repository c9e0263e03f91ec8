//! Watcher contracts.
//!
//! A watcher is a [`Worker`] that also yields change notifications. `next()`
//! returning `None` means the change stream closed; the watcher's own outcome
//! then says why. Notify watchers carry no payload (a tick means "re-read
//! current state"); strings watchers carry batches of entity ids.
//!
//! [`channel`] builds a watcher fed from an in-process sender, which is how
//! state-client adapters bridge their transport into this contract.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::worker::{Lifecycle, LifecycleState, Worker};

/// Watcher whose ticks carry no payload.
#[async_trait]
pub trait NotifyWatcher: Worker {
    /// Next tick, or `None` once the watcher has stopped.
    async fn next(&mut self) -> Option<()>;
}

/// Watcher yielding batches of changed entity ids.
#[async_trait]
pub trait StringsWatcher: Worker {
    /// Next batch, or `None` once the watcher has stopped.
    async fn next(&mut self) -> Option<Vec<String>>;
}

/// The error to terminate with after a watcher's stream closed.
///
/// A watcher that stopped cleanly without being asked to is itself a failure.
pub async fn watcher_error<W>(name: &str, watcher: &W) -> Error
where
    W: Worker + ?Sized,
{
    match watcher.wait().await {
        Err(e) => e.annotate(name),
        Ok(()) => Error::WatcherStopped(name.to_string()),
    }
}

// =============================================================================
// Channel Watcher
// =============================================================================

/// Create a watcher and the sender that feeds it.
pub fn channel<T: Send + 'static>(capacity: usize) -> (WatcherSender<T>, ChannelWatcher<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let lifecycle = Arc::new(Lifecycle::new());
    (
        WatcherSender {
            tx,
            lifecycle: Arc::clone(&lifecycle),
        },
        ChannelWatcher { rx, lifecycle },
    )
}

/// Producer half of a [`ChannelWatcher`].
///
/// Dropping the sender stops the watcher cleanly unless it already failed.
pub struct WatcherSender<T> {
    tx: mpsc::Sender<T>,
    lifecycle: Arc<Lifecycle>,
}

impl<T: Send + 'static> WatcherSender<T> {
    /// Deliver a change. Returns false once the watcher has stopped.
    pub async fn send(&self, change: T) -> bool {
        tokio::select! {
            biased;
            _ = self.lifecycle.dying() => false,
            sent = self.tx.send(change) => sent.is_ok(),
        }
    }

    /// Deliver a change without waiting for buffer space.
    pub fn try_send(&self, change: T) -> bool {
        self.lifecycle.state() == LifecycleState::Alive && self.tx.try_send(change).is_ok()
    }

    /// Stop the watcher with `err` as its outcome.
    pub fn fail(&self, err: Error) {
        self.lifecycle.done(Err(err));
    }

    /// Returns true once the consumer killed or the producer failed the watcher.
    pub fn is_stopped(&self) -> bool {
        self.lifecycle.state() != LifecycleState::Alive
    }
}

impl<T> Drop for WatcherSender<T> {
    fn drop(&mut self) {
        self.lifecycle.done(Ok(()));
    }
}

/// Consumer half: the watcher handed to the provisioner.
pub struct ChannelWatcher<T> {
    rx: mpsc::Receiver<T>,
    lifecycle: Arc<Lifecycle>,
}

impl<T: Send + 'static> ChannelWatcher<T> {
    async fn recv(&mut self) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.lifecycle.dying() => None,
            change = self.rx.recv() => change,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Worker for ChannelWatcher<T> {
    fn kill(&self) {
        // No loop to unwind: a killed channel watcher is immediately dead.
        self.lifecycle.done(Ok(()));
    }

    async fn wait(&self) -> Result<()> {
        self.lifecycle.wait().await
    }

    fn err(&self) -> Result<()> {
        self.lifecycle.err()
    }
}

#[async_trait]
impl NotifyWatcher for ChannelWatcher<()> {
    async fn next(&mut self) -> Option<()> {
        self.recv().await
    }
}

#[async_trait]
impl StringsWatcher for ChannelWatcher<Vec<String>> {
    async fn next(&mut self) -> Option<Vec<String>> {
        self.recv().await
    }
}
