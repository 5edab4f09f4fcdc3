//! Apply engine: idempotent mutation primitives over a [`RecordStore`]
//!
//! Two kinds of write live here:
//!
//! - [`create_or_patch`] / [`patch`] diff an owned, mutated copy of the record
//!   against the original and send a JSON merge patch. An empty diff is not
//!   sent at all, so running the same mutator twice writes once.
//! - [`try_update`] / [`update_status`] send full writes guarded by the
//!   record's resource version and retry under a [`RetryPolicy`] when they
//!   lose a race.
//!
//! Mutators always receive an owned copy; the caller's snapshot is never
//! modified.

pub mod merge;

use kube::core::ObjectMeta;
use tracing::{debug, trace, warn};

use crate::crd::Record;
use crate::retry::RetryPolicy;
use crate::store::{ObjectKey, RecordStore};
use crate::{Error, Result};

/// What a create-or-patch call did to the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// Nothing was written
    Unchanged,
    /// A new record was created
    Created,
    /// An existing record was patched
    Patched,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Created => write!(f, "created"),
            Self::Patched => write!(f, "patched"),
        }
    }
}

fn kind<K: Record>() -> String {
    K::kind(&()).into_owned()
}

/// Create the record at `key` from `mutate(empty)`, or patch the existing one
pub async fn create_or_patch<K, S, F>(store: &S, key: &ObjectKey, mutate: F) -> Result<(K, Verb)>
where
    K: Record,
    S: RecordStore<K> + ?Sized,
    F: FnOnce(K) -> K,
{
    match store.get(key).await {
        Ok(current) => patch(store, current, mutate).await,
        Err(e) if e.is_not_found() => {
            debug!(kind = %kind::<K>(), key = %key, "creating record");
            let template = K::empty(ObjectMeta {
                name: Some(key.name.clone()),
                namespace: Some(key.namespace.clone()),
                ..Default::default()
            });
            let created = store.create(&mutate(template)).await?;
            Ok((created, Verb::Created))
        }
        Err(e) => Err(e.into()),
    }
}

/// Patch `current` with whatever `mutate` changes on a copy of it
pub async fn patch<K, S, F>(store: &S, current: K, mutate: F) -> Result<(K, Verb)>
where
    K: Record,
    S: RecordStore<K> + ?Sized,
    F: FnOnce(K) -> K,
{
    let modified = mutate(current.clone());
    patch_object(store, current, &modified).await
}

/// Patch `current` so that it matches `modified`
///
/// Returns `current` untouched with [`Verb::Unchanged`] when the two
/// serialize identically.
pub async fn patch_object<K, S>(store: &S, current: K, modified: &K) -> Result<(K, Verb)>
where
    K: Record,
    S: RecordStore<K> + ?Sized,
{
    let original = serde_json::to_value(&current).map_err(Error::serialization)?;
    let target = serde_json::to_value(modified).map_err(Error::serialization)?;

    let diff = merge::create_merge_patch(&original, &target);
    if merge::is_empty(&diff) {
        return Ok((current, Verb::Unchanged));
    }

    let key = ObjectKey::from_resource(&current);
    trace!(kind = %kind::<K>(), key = %key, patch = %diff, "patching record");
    let patched = store.patch(&key, &diff).await?;
    Ok((patched, Verb::Patched))
}

/// Fetch, mutate and fully update the record until the write lands
///
/// A missing record aborts immediately. Every other failure re-fetches on the
/// next attempt to pick up the latest resource version.
pub async fn try_update<K, S, F>(
    store: &S,
    key: &ObjectKey,
    policy: &RetryPolicy,
    mut mutate: F,
) -> Result<K>
where
    K: Record,
    S: RecordStore<K> + ?Sized,
    F: FnMut(K) -> K,
{
    let mut poller = policy.poller();
    let mut last_error = None;

    while poller.next_attempt().await {
        let current = match store.get(key).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Err(e.into()),
            Err(e) => {
                warn!(attempt = poller.attempts(), key = %key, error = %e, "failed to fetch record for update");
                last_error = Some(e);
                continue;
            }
        };

        match store.update(&mutate(current)).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_not_found() => return Err(e.into()),
            Err(e) => {
                warn!(attempt = poller.attempts(), key = %key, error = %e, "failed to update record");
                last_error = Some(e);
            }
        }
    }

    Err(Error::retry_exhausted(
        "update",
        kind::<K>(),
        key.to_string(),
        poller.attempts(),
        last_error.as_ref(),
    ))
}

/// Write `transform(record.status)` to the status sub-resource
///
/// Each attempt applies `transform` to the status `record` was passed in with,
/// on top of the most recently fetched metadata and spec. A conflict
/// re-fetches, a retryable failure retries as is, and anything else aborts.
pub async fn update_status<K, S, F>(
    store: &S,
    record: &K,
    policy: &RetryPolicy,
    transform: F,
) -> Result<K>
where
    K: Record,
    S: RecordStore<K> + ?Sized,
    F: Fn(K::Status) -> K::Status,
{
    let key = ObjectKey::from_resource(record);
    let original = record.status().cloned().unwrap_or_default();
    let mut base = record.clone();
    let mut poller = policy.poller();
    let mut last_error = None;

    while poller.next_attempt().await {
        let mut attempt = base.clone();
        attempt.set_status(transform(original.clone()));

        match store.update_status(&attempt).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() => {
                debug!(attempt = poller.attempts(), key = %key, "status update conflicted, re-fetching");
                last_error = Some(e);
                match store.get(&key).await {
                    Ok(latest) => base = latest,
                    Err(e) if e.is_retryable() => last_error = Some(e),
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) if e.is_retryable() => {
                debug!(attempt = poller.attempts(), key = %key, error = %e, "status update failed, retrying");
                last_error = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::retry_exhausted(
        "update status of",
        kind::<K>(),
        key.to_string(),
        poller.attempts(),
        last_error.as_ref(),
    ))
}
