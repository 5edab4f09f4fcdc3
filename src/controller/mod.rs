//! Finalizer-guarded reconciliation of Grafana records
//!
//! Every record kind goes through the same state machine, decided by two bits
//! of metadata: whether our finalizer is present and whether the record is
//! marked for deletion.
//!
//! | finalizer | deleting | state         | action                                  |
//! |-----------|----------|---------------|-----------------------------------------|
//! | no        | no       | `NoFinalizer` | add the finalizer, nothing else         |
//! | no        | yes      | `Done`        | nothing                                 |
//! | yes       | no       | `Active`      | create or update the Grafana object     |
//! | yes       | yes      | `Finalizing`  | delete the Grafana object, then release |
//!
//! The finalizer therefore always exists before Grafana is touched, and is only
//! released once Grafana confirmed the delete.

mod dashboard;
mod datasource;

use std::sync::Arc;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::apply;
use crate::crd::{GrafanaObjectStatus, GrafanaRef, Record};
use crate::grafana::{Created, GrafanaClient, GrafanaClientProvider, GrafanaError};
use crate::kube_utils::{add_finalizer, has_finalizer, is_deleting, remove_finalizer};
use crate::queue::Reconcile;
use crate::retry::RetryPolicy;
use crate::store::{ObjectKey, RecordStore};
use crate::{Error, Result};

/// A record kind that mirrors one Grafana object
#[async_trait]
pub trait GrafanaObject: Record<Status = GrafanaObjectStatus> {
    /// Finalizer owned by this controller for the kind
    const FINALIZER: &'static str;

    /// Grafana instance the record targets
    fn grafana_ref(&self) -> Option<&GrafanaRef>;

    /// Check the spec can be sent to Grafana
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Create the object in Grafana
    async fn create_in(&self, client: &dyn GrafanaClient) -> Result<Created>;

    /// Update the Grafana object `id` to match the spec
    async fn update_in(&self, client: &dyn GrafanaClient, id: i64) -> Result<String>;

    /// Delete the Grafana object `id`
    async fn delete_in(&self, client: &dyn GrafanaClient, id: i64)
        -> std::result::Result<String, GrafanaError>;
}

/// Where a record stands in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Live record not yet guarded by our finalizer
    NoFinalizer,
    /// Live record guarded by our finalizer
    Active,
    /// Deletion requested, Grafana object not yet released
    Finalizing,
    /// Deletion requested and nothing left to clean up
    Done,
}

impl LifecycleState {
    /// Classify `obj` with respect to `finalizer`
    pub fn of<K: Resource>(obj: &K, finalizer: &str) -> Self {
        match (has_finalizer(obj, finalizer), is_deleting(obj)) {
            (false, false) => Self::NoFinalizer,
            (false, true) => Self::Done,
            (true, false) => Self::Active,
            (true, true) => Self::Finalizing,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFinalizer => write!(f, "NoFinalizer"),
            Self::Active => write!(f, "Active"),
            Self::Finalizing => write!(f, "Finalizing"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Reconciler for one record kind
///
/// Holds only injected handles; the queue hands it keys and it re-reads the
/// record itself.
pub struct Reconciler<K> {
    store: Arc<dyn RecordStore<K>>,
    grafana: Arc<dyn GrafanaClientProvider>,
    retry: RetryPolicy,
}

impl<K: GrafanaObject> Reconciler<K> {
    /// Create a reconciler over `store`, syncing to clients from `grafana`
    pub fn new(
        store: Arc<dyn RecordStore<K>>,
        grafana: Arc<dyn GrafanaClientProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            grafana,
            retry,
        }
    }

    fn kind() -> String {
        K::kind(&()).into_owned()
    }

    async fn client(&self, record: &K) -> Result<Arc<dyn GrafanaClient>> {
        let namespace = record.namespace().unwrap_or_default();
        Ok(self
            .grafana
            .client_for(&namespace, record.grafana_ref())
            .await?)
    }

    async fn ensure_finalizer(&self, record: K) -> Result<()> {
        let (_, verb) = apply::patch(self.store.as_ref(), record, |r| {
            add_finalizer(r, K::FINALIZER)
        })
        .await?;
        info!(%verb, finalizer = K::FINALIZER, "added finalizer");
        Ok(())
    }

    async fn sync(&self, record: K) -> Result<()> {
        if let Err(e) = record.validate() {
            self.record_failure(&record, "InvalidSpec", &e).await;
            return Err(e);
        }
        let client = match self.client(&record).await {
            Ok(client) => client,
            Err(e) => {
                self.record_failure(&record, "GrafanaUnavailable", &e).await;
                return Err(e);
            }
        };
        let generation = record.meta().generation.unwrap_or_default();

        match record.status().and_then(|s| s.external_id) {
            None => {
                let created = match record.create_in(client.as_ref()).await {
                    Ok(created) => created,
                    Err(e) => {
                        self.record_failure(&record, "CreateFailed", &e).await;
                        return Err(e);
                    }
                };
                info!(id = created.id, message = %created.message, "created in grafana");

                let id = created.id;
                apply::update_status(self.store.as_ref(), &record, &self.retry, |s| {
                    s.current(id, generation)
                })
                .await?;
            }
            Some(id) => {
                let message = match record.update_in(client.as_ref(), id).await {
                    Ok(message) => message,
                    Err(e) => {
                        self.record_failure(&record, "UpdateFailed", &e).await;
                        return Err(e);
                    }
                };
                info!(id, %message, "updated in grafana");

                let status = record.status().cloned().unwrap_or_default();
                if status.clone().current(id, generation) != status {
                    apply::update_status(self.store.as_ref(), &record, &self.retry, |s| {
                        s.current(id, generation)
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn finalize(&self, record: K) -> Result<()> {
        let Some(id) = record.status().and_then(|s| s.external_id) else {
            let key = ObjectKey::from_resource(&record);
            let err = Error::missing_external_id(Self::kind(), key.to_string());
            self.record_failure(&record, "MissingExternalID", &err).await;
            return Err(err);
        };

        let client = self.client(&record).await?;
        match record.delete_in(client.as_ref(), id).await {
            Ok(message) => info!(id, %message, "deleted from grafana"),
            Err(e) if e.is_not_found() => info!(id, "already absent from grafana"),
            Err(e) => {
                let e = Error::from(e);
                self.record_failure(&record, "DeleteFailed", &e).await;
                return Err(e);
            }
        }

        apply::patch(self.store.as_ref(), record, |r| {
            remove_finalizer(r, K::FINALIZER)
        })
        .await?;
        info!(finalizer = K::FINALIZER, "released finalizer");
        Ok(())
    }

    /// Best-effort `Failed` status; the caller returns `err` either way
    async fn record_failure(&self, record: &K, reason: &str, err: &Error) {
        let generation = record.meta().generation.unwrap_or_default();
        let message = err.to_string();
        let status = record.status().cloned().unwrap_or_default();
        if status.clone().failed(reason, message.as_str(), generation) == status {
            return;
        }

        let result = apply::update_status(self.store.as_ref(), record, &self.retry, |s| {
            s.failed(reason, message.as_str(), generation)
        })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to record failure in status");
        }
    }
}

#[async_trait]
impl<K: GrafanaObject> Reconcile<ObjectKey> for Reconciler<K> {
    #[instrument(skip(self, key), fields(kind = %K::kind(&()), key = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        let record = match self.store.get(key).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!("record no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let state = LifecycleState::of(&record, K::FINALIZER);
        debug!(%state, "reconciling");
        match state {
            LifecycleState::NoFinalizer => self.ensure_finalizer(record).await,
            LifecycleState::Active => self.sync(record).await,
            LifecycleState::Finalizing => self.finalize(record).await,
            LifecycleState::Done => Ok(()),
        }
    }
}
