//! Execution context of one actor.
//!
//! [`ActorContext`] supplies the scheduling primitives storage operations are
//! written against:
//!
//! - an **input gate** ([`await_io`](ActorContext::await_io)): input-locked waits run one at a
//!   time in arrival order, so `put(); get()` observes the write;
//! - a **critical section** ([`block_concurrency_while`](ActorContext::block_concurrency_while)):
//!   while a body runs inside it, no other storage operation on the actor may start;
//! - an **output gate** ([`output_lock`](ActorContext::output_lock),
//!   [`wait_for_output_locks`](ActorContext::wait_for_output_locks)): confirmed writes hold it
//!   until their backpressure settles, and write billing waits for it to drain;
//! - a **background task set** ([`add_task`](ActorContext::add_task)) for fire-and-forget work such
//!   as deferred billing and rollback acknowledgements;
//! - a [`Clock`] and the [`StorageMeter`] billing sink.
//!
//! The context is cheap to clone; clones share every primitive.

use std::{future::Future, sync::Arc};

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use tokio::{
    sync::{RwLock, RwLockReadGuard, watch},
    task::JoinSet,
};
use tracing::warn;

use crate::{
    error::StorageResult,
    metrics::{ActorMetrics, StorageMeter},
};

tokio::task_local! {
    /// Set while a future runs inside the actor's critical section.
    static IN_CRITICAL_SECTION: ();
}

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct ContextInner {
    input_gate: tokio::sync::Mutex<()>,
    critical_section: RwLock<()>,
    output_locks: watch::Sender<usize>,
    tasks: Mutex<JoinSet<()>>,
    clock: Arc<dyn Clock>,
    meter: Arc<dyn StorageMeter>,
}

/// Scheduling primitives, clock and billing sink of one actor.
#[derive(Clone)]
pub struct ActorContext {
    inner: Arc<ContextInner>,
}

#[bon::bon]
impl ActorContext {
    /// Creates a context.
    ///
    /// Defaults to the system clock and a fresh [`ActorMetrics`] meter.
    #[builder]
    pub fn new(meter: Option<Arc<dyn StorageMeter>>, clock: Option<Arc<dyn Clock>>) -> Self {
        let meter = meter.unwrap_or_else(|| Arc::new(ActorMetrics::new()));
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let (output_locks, _) = watch::channel(0);
        Self {
            inner: Arc::new(ContextInner {
                input_gate: tokio::sync::Mutex::new(()),
                critical_section: RwLock::new(()),
                output_locks,
                tasks: Mutex::new(JoinSet::new()),
                clock,
                meter,
            }),
        }
    }
}

impl ActorContext {
    /// The billing sink.
    #[must_use]
    pub fn meter(&self) -> &Arc<dyn StorageMeter> {
        &self.inner.meter
    }

    /// Current time, truncated to whole milliseconds.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now().trunc_subsecs(3)
    }

    /// Awaits `fut`, either independently or behind every earlier input-locked wait.
    pub async fn await_io<F: Future>(&self, allow_concurrency: bool, fut: F) -> F::Output {
        if allow_concurrency {
            return fut.await;
        }
        let _input = self.inner.input_gate.lock().await;
        fut.await
    }

    /// Runs `body` with every other storage operation on this actor held off.
    ///
    /// Calls nested inside a running body execute the inner body directly.
    pub async fn block_concurrency_while<F, Fut>(&self, body: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        if Self::in_critical_section() {
            return body().await;
        }
        let _exclusive = self.inner.critical_section.write().await;
        IN_CRITICAL_SECTION.scope((), body()).await
    }

    /// Waits until no critical section is running.
    ///
    /// Returns `None` when called from inside the critical section itself.
    pub(crate) async fn enter_operation(&self) -> Option<RwLockReadGuard<'_, ()>> {
        if Self::in_critical_section() {
            return None;
        }
        Some(self.inner.critical_section.read().await)
    }

    /// Returns `true` if the current task is running inside the critical section.
    #[must_use]
    pub fn in_critical_section() -> bool {
        IN_CRITICAL_SECTION.try_with(|()| ()).is_ok()
    }

    /// Holds the output gate until the returned lock is dropped.
    #[must_use = "the output gate is released when the lock is dropped"]
    pub fn output_lock(&self) -> OutputLock {
        self.inner.output_locks.send_modify(|held| *held += 1);
        OutputLock { context: self.clone() }
    }

    /// Number of output locks currently held.
    #[must_use]
    pub fn output_locks_held(&self) -> usize {
        *self.inner.output_locks.borrow()
    }

    /// Resolves once no output lock is held.
    pub async fn wait_for_output_locks(&self) {
        let mut held = self.inner.output_locks.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = held.wait_for(|count| *count == 0).await;
    }

    /// Registers a background task. Failures are logged and never surfaced.
    ///
    /// Outside a tokio runtime the task is dropped with a warning.
    pub fn add_task<F>(&self, task: F)
    where
        F: Future<Output = StorageResult<()>> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime available, dropping background storage task");
            return;
        };
        let mut tasks = self.inner.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(
            async move {
                if let Err(error) = task.await {
                    warn!(error = %error, "background storage task failed");
                }
            },
            &runtime,
        );
    }

    /// Number of background tasks not yet collected by [`drain_tasks`](Self::drain_tasks).
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Waits for every registered background task, including tasks registered while draining.
    pub async fn drain_tasks(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(error) = joined {
                    warn!(error = %error, "background storage task panicked");
                }
            }
        }
    }
}

impl Default for ActorContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorContext")
            .field("output_locks_held", &self.output_locks_held())
            .field("pending_tasks", &self.pending_tasks())
            .finish_non_exhaustive()
    }
}

/// Guard holding the output gate. See [`ActorContext::output_lock`].
pub struct OutputLock {
    context: ActorContext,
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        self.context.inner.output_locks.send_modify(|held| *held -= 1);
    }
}

impl std::fmt::Debug for OutputLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLock").finish_non_exhaustive()
    }
}
