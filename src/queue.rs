//! Deduplicating work queue and worker pool
//!
//! [`WorkQueue`] tracks keys in three sets:
//!
//! - *queued*: waiting for a worker, each key at most once;
//! - *processing*: handed to a worker and not yet [`WorkQueue::done`];
//! - *dirty*: added while queued or processing.
//!
//! A key added while it is being processed is parked and re-queued when the
//! worker finishes, so a key is never processed by two workers at once and a
//! burst of notifications collapses into one extra pass.
//!
//! [`Dispatcher`] runs a fixed number of workers over a queue and decides what
//! happens to a key whose reconcile failed: requeue with backoff, or drop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::retry::Backoff;
use crate::Result;

/// Handler invoked by the dispatcher for each key
#[async_trait]
pub trait Reconcile<T: Send + Sync>: Send + Sync {
    /// Reconcile the record identified by `key`
    async fn reconcile(&self, key: &T) -> Result<()>;
}

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    requeues: HashMap<T, u32>,
    shutting_down: bool,
}

/// Deduplicating FIFO of keys with per-key requeue accounting
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    backoff: Backoff,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create a queue that spaces requeues with `backoff`
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                requeues: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue `key` unless it is already waiting
    pub fn add(&self, key: T) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue `key` after `delay`
    ///
    /// Dropped if the queue shuts down in the meantime.
    pub fn add_after(self: &Arc<Self>, key: T, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Enqueue `key` after the backoff for its requeue count, and count it
    pub fn add_rate_limited(self: &Arc<Self>, key: T) {
        let requeues = {
            let mut state = self.lock();
            let count = state.requeues.entry(key.clone()).or_insert(0);
            let previous = *count;
            *count += 1;
            previous
        };
        self.add_after(key, self.backoff.delay(requeues));
    }

    /// Reset the requeue count of `key`
    pub fn forget(&self, key: &T) {
        self.lock().requeues.remove(key);
    }

    /// How many times `key` has been requeued since it was last forgotten
    pub fn num_requeues(&self, key: &T) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shut down. The caller owns the key
    /// until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing, re-queueing it if it was added meanwhile
    pub fn done(&self, key: &T) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] was called
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting for a worker
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-size worker pool draining a [`WorkQueue`]
pub struct Dispatcher<T> {
    name: String,
    queue: Arc<WorkQueue<T>>,
    workers: usize,
    max_requeues: u32,
}

impl<T> Dispatcher<T>
where
    T: Clone + Eq + Hash + Display + Send + Sync + 'static,
{
    /// Create a dispatcher named `name` (used in logs)
    pub fn new(
        name: impl Into<String>,
        queue: Arc<WorkQueue<T>>,
        workers: usize,
        max_requeues: u32,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            workers: workers.max(1),
            max_requeues,
        }
    }

    /// The queue this dispatcher drains
    pub fn queue(&self) -> &Arc<WorkQueue<T>> {
        &self.queue
    }

    /// Run workers until `shutdown` is cancelled
    ///
    /// In-flight reconciles are dropped at their next await point once
    /// shutdown is requested.
    pub async fn run<R>(self, reconciler: Arc<R>, shutdown: CancellationToken)
    where
        R: Reconcile<T> + ?Sized + 'static,
    {
        info!(dispatcher = %self.name, workers = self.workers, "starting workers");

        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            workers.spawn(work(
                self.name.clone(),
                worker,
                Arc::clone(&self.queue),
                Arc::clone(&reconciler),
                self.max_requeues,
                shutdown.clone(),
            ));
        }

        shutdown.cancelled().await;
        self.queue.shut_down();
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(dispatcher = %self.name, error = %e, "worker panicked");
            }
        }
        info!(dispatcher = %self.name, "workers stopped");
    }
}

async fn work<T, R>(
    name: String,
    worker: usize,
    queue: Arc<WorkQueue<T>>,
    reconciler: Arc<R>,
    max_requeues: u32,
    shutdown: CancellationToken,
) where
    T: Clone + Eq + Hash + Display + Send + Sync + 'static,
    R: Reconcile<T> + ?Sized,
{
    while let Some(key) = queue.get().await {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(dispatcher = %name, worker, key = %key, "dropping in-flight reconcile");
                queue.done(&key);
                break;
            }
            result = reconciler.reconcile(&key) => result,
        };

        match result {
            Ok(()) => queue.forget(&key),
            Err(e) if !e.is_retryable() => {
                error!(dispatcher = %name, key = %key, error = %e, "reconcile failed, not retrying");
                queue.forget(&key);
            }
            Err(e) if queue.num_requeues(&key) < max_requeues => {
                warn!(
                    dispatcher = %name,
                    key = %key,
                    requeues = queue.num_requeues(&key),
                    error = %e,
                    "reconcile failed, requeueing"
                );
                queue.add_rate_limited(key.clone());
            }
            Err(e) => {
                error!(
                    dispatcher = %name,
                    key = %key,
                    max_requeues,
                    error = %e,
                    "reconcile failed, giving up until the next change"
                );
                queue.forget(&key);
            }
        }
        queue.done(&key);
    }
}
