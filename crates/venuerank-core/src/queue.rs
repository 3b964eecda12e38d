//! Concurrency-bounded task queue with epoch invalidation.
//!
//! Lookup tasks are spawned immediately but gated on a fair semaphore, so at
//! most `max_concurrent` run at once and starts happen in submission order.
//! A key-based dedup set prevents the same work from being queued twice
//! while a previous submission is still pending or running.
//!
//! Invalidation is cooperative. [`invalidate`](TaskQueue::invalidate) bumps
//! the epoch counter and cancels the epoch's token; tasks that have not yet
//! started are skipped when they acquire their permit, and tasks already
//! past an await point observe [`TaskContext::is_current`] turning false and
//! discard their results. Nothing is aborted mid-flight.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Handle passed to every task. Captures the epoch the task was submitted
/// under so the task can detect invalidation at its own await points.
#[derive(Clone)]
pub struct TaskContext {
    epoch: u64,
    queue_epoch: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl TaskContext {
    /// Whether the submitting epoch is still the live one. Tasks should
    /// re-check this after awaits and drop their results when it is false.
    pub fn is_current(&self) -> bool {
        self.epoch == self.queue_epoch.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Cancellation token for this epoch, for use in `tokio::select!`.
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Removes the dedup entry when the task finishes, even on panic. The epoch
/// check keeps a stale task from evicting a same-key entry submitted after
/// an invalidation.
struct KeyGuard {
    keys: Arc<DashMap<String, u64>>,
    key: String,
    epoch: u64,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.keys.remove_if(&self.key, |_, e| *e == self.epoch);
    }
}

/// Decrements the active-task gauge on drop, so a panicking task body
/// still releases its slot in the count.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TaskQueue {
    semaphore: Arc<Semaphore>,
    keys: Arc<DashMap<String, u64>>,
    epoch: Arc<AtomicU64>,
    /// Current epoch's cancellation token. Locked together with the epoch
    /// bump in `invalidate` so submissions see a consistent pair.
    cancel: std::sync::Mutex<CancellationToken>,
    active: Arc<AtomicUsize>,
}

impl TaskQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            keys: Arc::new(DashMap::new()),
            epoch: Arc::new(AtomicU64::new(0)),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submit a task under `key`. Returns `false` without spawning when a
    /// task with the same key is already pending or running in the current
    /// epoch. The task body receives a [`TaskContext`] for staleness checks.
    pub fn enqueue<F, Fut>(&self, key: impl Into<String>, task: F) -> bool
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();

        let (epoch, cancel) = {
            let guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            (self.epoch.load(Ordering::SeqCst), guard.clone())
        };

        // Claim the key; losing the race means a duplicate.
        let claimed = {
            let entry = self.keys.entry(key.clone());
            match entry {
                dashmap::mapref::entry::Entry::Occupied(_) => false,
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(epoch);
                    true
                }
            }
        };
        if !claimed {
            tracing::debug!(key, "dropping duplicate task");
            return false;
        }

        let ctx = TaskContext {
            epoch,
            queue_epoch: Arc::clone(&self.epoch),
            cancel,
        };
        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);
        let guard = KeyGuard {
            keys: Arc::clone(&self.keys),
            key,
            epoch,
        };

        tokio::spawn(async move {
            let _guard = guard;
            // Fair semaphore: permits are granted in submission order.
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return, // queue shut down
            };
            if !ctx.is_current() || ctx.cancelled().is_cancelled() {
                tracing::debug!(epoch = ctx.epoch, "skipping stale task");
                return;
            }
            active.fetch_add(1, Ordering::SeqCst);
            let _active = ActiveGuard(active);
            // Run the body as its own task so a panic is caught at the
            // join instead of silently killing this wrapper.
            if let Err(e) = tokio::spawn(task(ctx)).await
                && e.is_panic()
            {
                tracing::warn!(error = %e, "queued task panicked");
            }
            drop(permit);
        });
        true
    }

    /// Invalidate all queued work: bump the epoch, cancel the old token,
    /// and forget pending dedup keys. Running tasks are not aborted; they
    /// observe the epoch change and discard their results.
    pub fn invalidate(&self) {
        let new_epoch = {
            let mut guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            let new_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            guard.cancel();
            *guard = CancellationToken::new();
            new_epoch
        };
        self.keys.retain(|_, e| *e == new_epoch);
        tracing::debug!(epoch = new_epoch, "queue invalidated");
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// A context bound to the current epoch, for work running outside the
    /// queue that still wants staleness checks.
    pub fn context(&self) -> TaskContext {
        let guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        TaskContext {
            epoch: self.epoch.load(Ordering::SeqCst),
            queue_epoch: Arc::clone(&self.epoch),
            cancel: guard.clone(),
        }
    }

    /// Number of tasks currently executing their body.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of keys pending or running.
    pub fn queued(&self) -> usize {
        self.keys.len()
    }

    /// Stop admitting queued tasks. Tasks waiting on a permit exit without
    /// running; tasks already running finish normally.
    pub fn shutdown(&self) {
        self.semaphore.close();
    }

    /// Wait until no task is pending or running. Intended for tests and
    /// orderly shutdown, not the hot path.
    pub async fn wait_idle(&self) {
        while !self.keys.is_empty() || self.active() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("epoch", &self.current_epoch())
            .field("active", &self.active())
            .field("queued", &self.queued())
            .finish()
    }
}
