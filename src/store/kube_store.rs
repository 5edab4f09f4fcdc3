//! [`RecordStore`] backed by the Kubernetes API server

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::trace;

use super::{ObjectKey, RecordStore, StoreError};
use crate::crd::Record;

/// Kubernetes-backed record store
///
/// Status writes replace the `status` sub-resource with the full record, so the
/// API server rejects a stale `resourceVersion` with 409.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: Record> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) => match ae.code {
                404 => StoreError::NotFound(ae.message.clone()),
                409 => StoreError::Conflict(ae.message.clone()),
                429 | 500 | 502 | 503 | 504 => StoreError::Retryable(ae.message.clone()),
                _ => StoreError::Fatal(err.to_string()),
            },
            kube::Error::SerdeError(_) => StoreError::Fatal(err.to_string()),
            // Transport, TLS and timeout failures
            _ => StoreError::Retryable(err.to_string()),
        }
    }
}

#[async_trait]
impl<K: Record> RecordStore<K> for KubeStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError> {
        Ok(self.api(&key.namespace).get(&key.name).await?)
    }

    async fn create(&self, record: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(record);
        Ok(self
            .api(&key.namespace)
            .create(&PostParams::default(), record)
            .await?)
    }

    async fn patch(&self, key: &ObjectKey, diff: &serde_json::Value) -> Result<K, StoreError> {
        trace!(key = %key, patch = %diff, "sending merge patch");
        Ok(self
            .api(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(diff))
            .await?)
    }

    async fn update(&self, record: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(record);
        Ok(self
            .api(&key.namespace)
            .replace(&key.name, &PostParams::default(), record)
            .await?)
    }

    async fn update_status(&self, record: &K) -> Result<K, StoreError> {
        let key = ObjectKey::from_resource(record);
        Ok(self
            .api(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), status_body(record)?)
            .await?)
    }
}

/// Body of a status replace: the whole record, `resourceVersion` included
///
/// Status fields omitted when serializing are reset by the API server.
fn status_body<K: Record>(record: &K) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record).map_err(|e| StoreError::Fatal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    use crate::crd::{Datasource, DatasourceSpec, GrafanaObjectStatus, Phase};

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed with {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors_by_code() {
        assert!(StoreError::from(api_error(404)).is_not_found());
        assert!(StoreError::from(api_error(409)).is_conflict());
        for code in [429, 500, 502, 503, 504] {
            assert!(StoreError::from(api_error(code)).is_retryable(), "{code}");
        }
        for code in [400, 403, 422] {
            assert!(
                matches!(StoreError::from(api_error(code)), StoreError::Fatal(_)),
                "{code}"
            );
        }
    }

    #[test]
    fn not_found_keeps_server_message() {
        assert_eq!(
            StoreError::from(api_error(404)),
            StoreError::NotFound("request failed with 404".to_string())
        );
    }

    fn recovered_datasource() -> Datasource {
        let mut ds = Datasource::new("ds1", DatasourceSpec::default());
        ds.metadata.namespace = Some("default".to_string());
        ds.metadata.resource_version = Some("42".to_string());
        ds.set_status(GrafanaObjectStatus::default().current(7, 1));
        ds
    }

    #[test]
    fn status_body_carries_resource_version() {
        let body: serde_json::Value =
            serde_json::from_slice(&status_body(&recovered_datasource()).unwrap()).unwrap();
        assert_eq!(body["metadata"]["resourceVersion"], "42");
        assert_eq!(body["status"]["externalID"], 7);
    }

    #[test]
    fn status_body_replaces_stale_failure() {
        let stale = GrafanaObjectStatus::default()
            .current(7, 1)
            .failed("UpdateFailed", "grafana returned 502", 1);
        let record = recovered_datasource();
        let mut stored = serde_json::to_value(&record).unwrap();
        stored["status"] = serde_json::to_value(&stale).unwrap();

        // The status sub-resource PUT swaps `.status` wholesale
        let body: serde_json::Value =
            serde_json::from_slice(&status_body(&record).unwrap()).unwrap();
        assert!(body["status"].get("reason").is_none());
        stored["status"] = body["status"].clone();

        let written: Datasource = serde_json::from_value(stored).unwrap();
        let status = written.status.unwrap();
        assert_eq!(status.phase, Phase::Current);
        assert_eq!(status.reason, "");
        assert_eq!(Some(status), record.status);
    }
}
