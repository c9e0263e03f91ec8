//! Fake provisioning task.
//!
//! The fake does no provisioning. It drains its watchers, records what it
//! saw, and exposes a [`StartedTask`] so tests can observe safe-mode changes
//! and kill the task with an error of their choosing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tether_provisioner::watcher::watcher_error;
use tether_provisioner::worker::stop_worker;
use tether_provisioner::{
    Error, Lifecycle, LifecycleState, NotifyWatcher, ProvisionerTask, Result, StringsWatcher,
    TaskFactory, TaskParams, Worker,
};
use tokio::sync::watch;
use tracing::{debug, info_span};

use crate::lock;

/// Records every task started through it.
pub struct FakeTaskFactory {
    started: watch::Sender<Vec<Arc<StartedTask>>>,
    start_error: Mutex<Option<Error>>,
}

impl FakeTaskFactory {
    pub fn new() -> Self {
        let (started, _) = watch::channel(Vec::new());
        Self {
            started,
            start_error: Mutex::new(None),
        }
    }

    /// Make the next started task die with `err` before doing any work.
    pub fn fail_next_start(&self, err: Error) {
        *lock(&self.start_error) = Some(err);
    }

    pub fn started_count(&self) -> usize {
        self.started.borrow().len()
    }

    /// Wait until the `index`th task (zero based) has been started.
    pub async fn wait_for_task(&self, index: usize) -> Option<Arc<StartedTask>> {
        let mut rx = self.started.subscribe();
        let started = rx.wait_for(|tasks| tasks.len() > index).await.ok()?;
        started.get(index).cloned()
    }
}

impl Default for FakeTaskFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskFactory for FakeTaskFactory {
    fn start_task(&self, params: TaskParams) -> Box<dyn ProvisionerTask> {
        let start_error = lock(&self.start_error).take();
        let lifecycle = Arc::new(Lifecycle::new());
        let started = Arc::new(StartedTask {
            agent_tag: params.agent_tag.clone(),
            initial_safe_mode: params.safe_mode,
            has_retry_watcher: params.retry_watcher.is_some(),
            safe_modes: watch::channel(Vec::new()).0,
            machine_batches: watch::channel(Vec::new()).0,
            retry_ticks: AtomicUsize::new(0),
            lifecycle: Arc::clone(&lifecycle),
        });

        let span = info_span!("provisioner_task", agent = %params.agent_tag);
        lifecycle.spawn(
            span,
            run(
                Arc::clone(&started),
                params.machine_watcher,
                params.retry_watcher,
                start_error,
            ),
        );

        self.started.send_modify(|tasks| tasks.push(Arc::clone(&started)));
        Box::new(FakeTask { started })
    }
}

async fn run(
    started: Arc<StartedTask>,
    mut machines: Box<dyn StringsWatcher>,
    mut retry: Option<Box<dyn NotifyWatcher>>,
    start_error: Option<Error>,
) -> Result<()> {
    let mut result = match start_error {
        Some(err) => Err(err),
        None => drain(&started, machines.as_mut(), &mut retry).await,
    };
    stop_worker("machine watcher", machines.as_ref(), &mut result).await;
    if let Some(retry) = &retry {
        stop_worker("retry watcher", retry.as_ref(), &mut result).await;
    }
    result
}

async fn drain(
    started: &StartedTask,
    machines: &mut dyn StringsWatcher,
    retry: &mut Option<Box<dyn NotifyWatcher>>,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;

            _ = started.lifecycle.dying() => return Err(Error::Dying),

            batch = machines.next() => match batch {
                Some(ids) => {
                    debug!(machines = ?ids, "Machines changed");
                    started.machine_batches.send_modify(|batches| batches.push(ids));
                }
                None => return Err(watcher_error("machine watcher", &*machines).await),
            },

            tick = next_retry(retry) => match tick {
                Some(()) => {
                    started.retry_ticks.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    if let Some(watcher) = retry.as_deref() {
                        return Err(watcher_error("retry watcher", watcher).await);
                    }
                }
            },
        }
    }
}

async fn next_retry(retry: &mut Option<Box<dyn NotifyWatcher>>) -> Option<()> {
    match retry {
        Some(watcher) => watcher.next().await,
        None => std::future::pending().await,
    }
}

struct FakeTask {
    started: Arc<StartedTask>,
}

#[async_trait]
impl Worker for FakeTask {
    fn kill(&self) {
        self.started.lifecycle.kill();
    }

    async fn wait(&self) -> Result<()> {
        self.started.lifecycle.wait().await
    }

    fn err(&self) -> Result<()> {
        self.started.lifecycle.err()
    }
}

impl ProvisionerTask for FakeTask {
    fn set_safe_mode(&self, safe_mode: bool) {
        self.started
            .safe_modes
            .send_modify(|calls| calls.push(safe_mode));
    }
}

/// Test-side view of a started task.
pub struct StartedTask {
    agent_tag: String,
    initial_safe_mode: bool,
    has_retry_watcher: bool,
    safe_modes: watch::Sender<Vec<bool>>,
    machine_batches: watch::Sender<Vec<Vec<String>>>,
    retry_ticks: AtomicUsize,
    lifecycle: Arc<Lifecycle>,
}

impl StartedTask {
    pub fn agent_tag(&self) -> &str {
        &self.agent_tag
    }

    pub fn initial_safe_mode(&self) -> bool {
        self.initial_safe_mode
    }

    /// Current safe mode: the last value set, or the one started with.
    pub fn safe_mode(&self) -> bool {
        self.safe_modes
            .borrow()
            .last()
            .copied()
            .unwrap_or(self.initial_safe_mode)
    }

    /// Every `set_safe_mode` call, in order.
    pub fn safe_mode_history(&self) -> Vec<bool> {
        self.safe_modes.borrow().clone()
    }

    /// Wait until `set_safe_mode` was called at least `count` times.
    pub async fn wait_for_safe_mode_calls(&self, count: usize) -> Vec<bool> {
        let mut rx = self.safe_modes.subscribe();
        let calls = match rx.wait_for(|calls| calls.len() >= count).await {
            Ok(calls) => calls.clone(),
            Err(_) => self.safe_mode_history(),
        };
        calls
    }

    pub fn has_retry_watcher(&self) -> bool {
        self.has_retry_watcher
    }

    pub fn machine_batches(&self) -> Vec<Vec<String>> {
        self.machine_batches.borrow().clone()
    }

    /// Wait until at least `count` machine batches were received.
    pub async fn wait_for_machine_batches(&self, count: usize) -> Vec<Vec<String>> {
        let mut rx = self.machine_batches.subscribe();
        let batches = match rx.wait_for(|batches| batches.len() >= count).await {
            Ok(batches) => batches.clone(),
            Err(_) => self.machine_batches(),
        };
        batches
    }

    pub fn retry_ticks(&self) -> usize {
        self.retry_ticks.load(Ordering::Relaxed)
    }

    /// Kill the task with `err` as its outcome.
    pub fn fail(&self, err: Error) {
        self.lifecycle.done(Err(err));
    }

    /// Finish the task cleanly, as if it ran out of work.
    pub fn finish(&self) {
        self.lifecycle.done(Ok(()));
    }

    pub fn is_stopped(&self) -> bool {
        self.lifecycle.state() == LifecycleState::Dead
    }

    pub async fn wait_stopped(&self) -> Result<()> {
        self.lifecycle.wait().await
    }
}
