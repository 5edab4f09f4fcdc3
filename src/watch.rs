//! Watch adapter: Kubernetes watch events and periodic resync into queue keys
//!
//! Every event only contributes its namespace/name; the reconciler re-reads
//! the record itself. Keys seen alive are remembered so a resync can enqueue
//! all of them again, which is what eventually retries a key the dispatcher
//! gave up on.

use std::collections::BTreeSet;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Api;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crd::Record;
use crate::queue::WorkQueue;
use crate::store::ObjectKey;

/// Server-side watch timeout; must stay below the client read timeout (30s)
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Keys currently known to exist, maintained from watch events
#[derive(Debug, Default)]
pub struct KeyTracker {
    known: BTreeSet<ObjectKey>,
    relisting: Option<BTreeSet<ObjectKey>>,
}

impl KeyTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` and enqueue the key it concerns
    pub fn apply<K: Record>(&mut self, event: Event<K>, queue: &WorkQueue<ObjectKey>) {
        match event {
            Event::Apply(obj) => {
                let key = ObjectKey::from_resource(&obj);
                self.known.insert(key.clone());
                queue.add(key);
            }
            Event::Delete(obj) => {
                let key = ObjectKey::from_resource(&obj);
                self.known.remove(&key);
                queue.add(key);
            }
            Event::Init => {
                self.relisting = Some(BTreeSet::new());
            }
            Event::InitApply(obj) => {
                let key = ObjectKey::from_resource(&obj);
                if let Some(relisting) = self.relisting.as_mut() {
                    relisting.insert(key.clone());
                }
                self.known.insert(key.clone());
                queue.add(key);
            }
            Event::InitDone => {
                if let Some(relisted) = self.relisting.take() {
                    self.known = relisted;
                }
            }
        }
    }

    /// Enqueue every known key; returns how many were enqueued
    pub fn resync(&self, queue: &WorkQueue<ObjectKey>) -> usize {
        for key in &self.known {
            queue.add(key.clone());
        }
        self.known.len()
    }

    /// Keys currently known
    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.known.iter()
    }
}

/// Feed `queue` from a watch on `api` until `shutdown` is cancelled
///
/// Watch errors are retried by the watcher's default backoff. `resync_period`
/// of zero disables resync.
pub async fn run<K: Record>(
    api: Api<K>,
    queue: Arc<WorkQueue<ObjectKey>>,
    resync_period: Duration,
    shutdown: CancellationToken,
) {
    let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
    let events = watcher::watcher(api, config).default_backoff();
    drive(events, &queue, resync_period, shutdown).await;
}

/// Apply `events` to `queue`, resyncing every `resync_period`, until the stream
/// ends or `shutdown` is cancelled
async fn drive<K, S>(
    events: S,
    queue: &WorkQueue<ObjectKey>,
    resync_period: Duration,
    shutdown: CancellationToken,
) -> KeyTracker
where
    K: Record,
    S: Stream<Item = Result<Event<K>, watcher::Error>>,
{
    let kind = K::kind(&()).into_owned();
    let mut events = pin!(events);
    let mut resync = resync_interval(resync_period);
    let mut tracker = KeyTracker::new();
    info!(%kind, "watching records");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick(&mut resync) => {
                let count = tracker.resync(queue);
                debug!(%kind, count, "resync");
            }
            event = events.next() => match event {
                Some(Ok(event)) => tracker.apply(event, queue),
                Some(Err(e)) => warn!(%kind, error = %e, "watch failed"),
                None => break,
            },
        }
    }
    info!(%kind, "watch stopped");
    tracker
}

/// First tick one full period from now; `None` for a zero period
fn resync_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
