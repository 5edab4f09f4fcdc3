//! Grafana API seam
//!
//! The HTTP client itself lives outside this crate. Reconcilers talk to Grafana
//! through [`GrafanaClient`] and obtain the right instance for a record from a
//! [`GrafanaClientProvider`]. [`GrafanaClients`] is a static registry
//! implementation of the provider, keyed by the record's `spec.grafana`
//! reference.

mod payload;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::crd::GrafanaRef;

pub use payload::{DashboardPayload, DatasourcePayload};

/// Error returned by Grafana calls
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GrafanaError {
    /// The request never got a response (connection refused, timeout)
    #[error("request failed: {0}")]
    Request(String),

    /// Grafana answered with an error status
    #[error("grafana returned {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Message from the response body
        message: String,
    },

    /// The referenced object doesn't exist in Grafana
    #[error("not found in grafana: {0}")]
    NotFound(String),

    /// No client is registered for the referenced Grafana instance
    #[error("no grafana instance registered for {0}")]
    Unresolved(String),
}

impl GrafanaError {
    /// Create a transport-level error
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    /// Whether the call may succeed if repeated unchanged
    ///
    /// Client errors other than 429 mean Grafana refused the object as sent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Unresolved(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound(_) => false,
        }
    }

    /// Whether the object is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result of a Grafana create call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Created {
    /// Identifier Grafana assigned to the new object
    pub id: i64,
    /// Status message from Grafana
    pub message: String,
}

/// Create/update/delete operations against one Grafana instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GrafanaClient: Send + Sync {
    /// Create a data source
    async fn create_datasource(&self, datasource: &DatasourcePayload)
        -> Result<Created, GrafanaError>;

    /// Update the data source `id`
    async fn update_datasource(
        &self,
        id: i64,
        datasource: &DatasourcePayload,
    ) -> Result<String, GrafanaError>;

    /// Delete the data source `id`
    async fn delete_datasource(&self, id: i64) -> Result<String, GrafanaError>;

    /// Create a dashboard
    async fn create_dashboard(&self, dashboard: &DashboardPayload)
        -> Result<Created, GrafanaError>;

    /// Update the dashboard `id`
    async fn update_dashboard(
        &self,
        id: i64,
        dashboard: &DashboardPayload,
    ) -> Result<String, GrafanaError>;

    /// Delete the dashboard `id`
    async fn delete_dashboard(&self, id: i64) -> Result<String, GrafanaError>;
}

/// Resolves the Grafana client a record should be synced with
#[async_trait]
pub trait GrafanaClientProvider: Send + Sync {
    /// Client for a record in `namespace` referencing `grafana`
    async fn client_for(
        &self,
        namespace: &str,
        grafana: Option<&GrafanaRef>,
    ) -> Result<Arc<dyn GrafanaClient>, GrafanaError>;
}

/// Static registry of Grafana clients
///
/// Named instances are looked up by `(namespace, name)`, where the namespace
/// defaults to the record's own. Records without a reference use the default
/// client.
#[derive(Clone, Default)]
pub struct GrafanaClients {
    default: Option<Arc<dyn GrafanaClient>>,
    named: HashMap<(String, String), Arc<dyn GrafanaClient>>,
}

impl GrafanaClients {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `client` for records without a Grafana reference
    pub fn with_default(mut self, client: Arc<dyn GrafanaClient>) -> Self {
        self.default = Some(client);
        self
    }

    /// Register `client` as the Grafana instance `namespace/name`
    pub fn with_instance(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        client: Arc<dyn GrafanaClient>,
    ) -> Self {
        self.named.insert((namespace.into(), name.into()), client);
        self
    }

    /// Look up the client for a record in `namespace`
    pub fn resolve(
        &self,
        namespace: &str,
        grafana: Option<&GrafanaRef>,
    ) -> Result<Arc<dyn GrafanaClient>, GrafanaError> {
        match grafana {
            Some(reference) => {
                let ns = reference.namespace.as_deref().unwrap_or(namespace);
                self.named
                    .get(&(ns.to_string(), reference.name.clone()))
                    .cloned()
                    .ok_or_else(|| GrafanaError::Unresolved(format!("{ns}/{}", reference.name)))
            }
            None => self
                .default
                .clone()
                .ok_or_else(|| GrafanaError::Unresolved("default instance".to_string())),
        }
    }
}

#[async_trait]
impl GrafanaClientProvider for GrafanaClients {
    async fn client_for(
        &self,
        namespace: &str,
        grafana: Option<&GrafanaRef>,
    ) -> Result<Arc<dyn GrafanaClient>, GrafanaError> {
        self.resolve(namespace, grafana)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str, namespace: Option<&str>) -> GrafanaRef {
        GrafanaRef {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    fn deleting(id: i64) -> Arc<dyn GrafanaClient> {
        let mut mock = MockGrafanaClient::new();
        mock.expect_delete_datasource()
            .returning(move |_| Ok(format!("client {id}")));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn resolves_named_instance_in_record_namespace() {
        let clients = GrafanaClients::new()
            .with_instance("monitoring", "grafana", deleting(1))
            .with_instance("default", "grafana", deleting(2));

        let client = clients
            .client_for("monitoring", Some(&reference("grafana", None)))
            .await
            .unwrap();
        assert_eq!(client.delete_datasource(0).await.unwrap(), "client 1");
    }

    #[tokio::test]
    async fn explicit_namespace_wins() {
        let clients = GrafanaClients::new().with_instance("shared", "grafana", deleting(3));

        let client = clients
            .client_for("team-a", Some(&reference("grafana", Some("shared"))))
            .await
            .unwrap();
        assert_eq!(client.delete_datasource(0).await.unwrap(), "client 3");
    }

    #[tokio::test]
    async fn falls_back_to_default_without_reference() {
        let clients = GrafanaClients::new().with_default(deleting(9));
        let client = clients.client_for("default", None).await.unwrap();
        assert_eq!(client.delete_datasource(0).await.unwrap(), "client 9");
    }

    #[test]
    fn unknown_instance_is_unresolved() {
        let clients = GrafanaClients::new();

        let err = clients
            .resolve("default", Some(&reference("grafana", None)))
            .err()
            .unwrap();
        assert_eq!(err, GrafanaError::Unresolved("default/grafana".to_string()));

        assert!(clients.resolve("default", None).is_err());
    }

    #[test]
    fn retryability_by_status() {
        assert!(GrafanaError::request("connection refused").is_retryable());
        assert!(GrafanaError::Rejected { status: 502, message: "bad gateway".into() }.is_retryable());
        assert!(GrafanaError::Rejected { status: 429, message: "slow down".into() }.is_retryable());
        assert!(!GrafanaError::Rejected { status: 400, message: "bad type".into() }.is_retryable());
        assert!(!GrafanaError::NotFound("7".into()).is_retryable());
    }
}
