//! Worker lifecycle primitives.
//!
//! Every long-lived unit in the provisioner (the provisioner loops, the
//! provisioning task, the watchers) is a [`Worker`]: it can be asked to stop,
//! and it reports exactly one terminal outcome.
//!
//! [`Lifecycle`] is the shared implementation:
//!
//! ```text
//! Alive --kill()/loop returns--> Dying --outcome latched--> Dead
//! ```
//!
//! - Cancellation is cooperative: `kill()` only trips a token the loop selects on.
//! - The outcome cell is write-once; every `wait()`/`err()` caller observes the
//!   same value.
//! - A loop returning [`Error::Dying`] latches a clean outcome.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument, Span};

use crate::error::{Error, Result};

// =============================================================================
// Worker Trait
// =============================================================================

/// A supervised unit of work with a kill/wait/err control surface.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Request cancellation. Non-blocking and idempotent.
    fn kill(&self);

    /// Block until the worker has fully stopped and return its terminal outcome.
    async fn wait(&self) -> Result<()>;

    /// Return the terminal outcome, or [`Error::StillAlive`] while running.
    fn err(&self) -> Result<()>;

    /// Kill the worker and wait for it.
    async fn stop(&self) -> Result<()> {
        self.kill();
        self.wait().await
    }
}

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Loop running.
    Alive,
    /// Cancellation requested or loop returned, outcome not latched yet.
    Dying,
    /// Outcome latched.
    Dead,
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Cancellation token plus write-once outcome cell.
#[derive(Debug)]
pub struct Lifecycle {
    cancel: CancellationToken,
    outcome: watch::Sender<Option<Result<()>>>,
}

impl Lifecycle {
    /// Create a lifecycle in the `Alive` state.
    pub fn new() -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            cancel: CancellationToken::new(),
            outcome,
        }
    }

    /// Request cancellation.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Resolves once cancellation was requested or the outcome was latched.
    pub async fn dying(&self) {
        self.cancel.cancelled().await;
    }

    /// Token the loop selects on.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latch the terminal outcome. Only the first call has any effect.
    pub fn done(&self, result: Result<()>) {
        let result = match result {
            Err(e) if e.is_dying() => Ok(()),
            other => other,
        };

        let latched = self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
        if !latched {
            debug!("Worker outcome already latched");
        }

        self.cancel.cancel();
    }

    /// Wait for the latched outcome.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.outcome.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(latched) => (*latched).clone().unwrap_or(Ok(())),
            // The sender lives in `self`, so the channel cannot close under us.
            Err(_) => Err(Error::Panicked("lifecycle outcome dropped".to_string())),
        };
        outcome
    }

    /// Non-blocking outcome poll.
    pub fn err(&self) -> Result<()> {
        self.outcome
            .borrow()
            .clone()
            .unwrap_or(Err(Error::StillAlive))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        if self.outcome.borrow().is_some() {
            LifecycleState::Dead
        } else if self.cancel.is_cancelled() {
            LifecycleState::Dying
        } else {
            LifecycleState::Alive
        }
    }

    /// Run `fut` as this lifecycle's loop and latch whatever it returns.
    ///
    /// A panicking loop latches [`Error::Panicked`] so waiters are released.
    pub fn spawn<F>(self: &Arc<Self>, span: Span, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let lifecycle = Arc::clone(self);
        let handle = tokio::spawn(fut.instrument(span.clone()));

        tokio::spawn(
            async move {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(error = %e, "Worker loop panicked");
                        Err(Error::Panicked(e.to_string()))
                    }
                };
                lifecycle.done(result);
            }
            .instrument(span),
        );
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for Lifecycle {
    fn kill(&self) {
        Lifecycle::kill(self);
    }

    async fn wait(&self) -> Result<()> {
        Lifecycle::wait(self).await
    }

    fn err(&self) -> Result<()> {
        Lifecycle::err(self)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Stop a sub-worker during teardown.
///
/// A stop failure is logged and becomes the result only if `result` was
/// still clean; an error already determined is never replaced.
pub async fn stop_worker<W>(name: &str, worker: &W, result: &mut Result<()>)
where
    W: Worker + ?Sized,
{
    if let Err(e) = worker.stop().await {
        if result.is_ok() {
            warn!(worker = name, error = %e, "Failed to stop worker");
            *result = Err(e.annotate(name));
        } else {
            debug!(worker = name, error = %e, "Worker stopped with error during teardown");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn_until_killed(lifecycle: &Arc<Lifecycle>, exit: Result<()>) {
        let token = lifecycle.token();
        lifecycle.spawn(Span::none(), async move {
            token.cancelled().await;
            exit
        });
    }

    #[tokio::test]
    async fn test_err_reports_still_alive() {
        let lifecycle = Arc::new(Lifecycle::new());
        spawn_until_killed(&lifecycle, Err(Error::Dying));

        assert_eq!(lifecycle.err(), Err(Error::StillAlive));
        assert_eq!(lifecycle.state(), LifecycleState::Alive);

        lifecycle.kill();
        timeout(WAIT, lifecycle.wait()).await.unwrap().unwrap();
        assert_eq!(lifecycle.err(), Ok(()));
        assert_eq!(lifecycle.state(), LifecycleState::Dead);
    }

    #[tokio::test]
    async fn test_kill_is_idempotent_and_concurrent() {
        let lifecycle = Arc::new(Lifecycle::new());
        spawn_until_killed(&lifecycle, Err(Error::State("torn down".into())));

        let mut killers = Vec::new();
        for _ in 0..16 {
            let lifecycle = Arc::clone(&lifecycle);
            killers.push(tokio::spawn(async move {
                lifecycle.kill();
                lifecycle.kill();
                lifecycle.wait().await
            }));
        }

        for killer in killers {
            let outcome = timeout(WAIT, killer).await.unwrap().unwrap();
            assert_eq!(outcome, Err(Error::State("torn down".into())));
        }
    }

    #[tokio::test]
    async fn test_first_outcome_wins() {
        let lifecycle = Lifecycle::new();
        lifecycle.done(Err(Error::NotFound("machine 0".into())));
        lifecycle.done(Ok(()));
        lifecycle.done(Err(Error::State("later".into())));

        assert_eq!(
            lifecycle.wait().await,
            Err(Error::NotFound("machine 0".into()))
        );
    }

    #[tokio::test]
    async fn test_dying_latches_clean() {
        let lifecycle = Lifecycle::new();
        lifecycle.done(Err(Error::Dying.annotate("provisioner")));
        assert_eq!(lifecycle.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_done_marks_dying() {
        let lifecycle = Lifecycle::new();
        lifecycle.done(Ok(()));
        timeout(WAIT, lifecycle.dying()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_twice_returns_same_outcome() {
        let lifecycle = Arc::new(Lifecycle::new());
        spawn_until_killed(&lifecycle, Err(Error::State("flaky".into())));

        let first = timeout(WAIT, Worker::stop(lifecycle.as_ref())).await.unwrap();
        let second = timeout(WAIT, Worker::stop(lifecycle.as_ref())).await.unwrap();
        assert_eq!(first, Err(Error::State("flaky".into())));
        assert_eq!(first, second);
    }

    async fn explode() -> Result<()> {
        panic!("loop exploded")
    }

    #[tokio::test]
    async fn test_panicking_loop_releases_waiters() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.spawn(Span::none(), explode());

        let outcome = timeout(WAIT, lifecycle.wait()).await.unwrap();
        assert!(matches!(outcome, Err(Error::Panicked(_))));
    }

    #[tokio::test]
    async fn test_stop_worker_keeps_primary_error() {
        let failing = Lifecycle::new();
        failing.done(Err(Error::State("stop failed".into())));

        let mut result = Err(Error::NotFound("environ".into()));
        stop_worker("watcher", &failing, &mut result).await;
        assert_eq!(result, Err(Error::NotFound("environ".into())));

        let mut result = Ok(());
        stop_worker("watcher", &failing, &mut result).await;
        assert_eq!(
            result,
            Err(Error::State("stop failed".into()).annotate("watcher"))
        );
    }
}
