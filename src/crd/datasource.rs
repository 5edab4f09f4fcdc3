//! Datasource Custom Resource Definition
//!
//! A Datasource describes one Grafana data source. The controller creates it in
//! Grafana, keeps it updated, and deletes it when the record is deleted.

use kube::core::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{GrafanaObjectStatus, GrafanaRef};
use super::Record;

/// Finalizer guarding deletion of the Grafana data source
pub const DATASOURCE_FINALIZER: &str = "datasource.grafana.searchlight.dev";

/// How Grafana reaches the data source
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceAccess {
    /// Requests go through the Grafana backend
    #[default]
    Proxy,
    /// The browser talks to the data source directly
    Direct,
}

impl std::fmt::Display for DatasourceAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proxy => write!(f, "proxy"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Basic auth credentials Grafana presents to the data source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    /// Username
    pub user: String,
    /// Password
    pub password: String,
}

/// Datasource specification
///
/// Example:
/// ```yaml
/// apiVersion: grafana.searchlight.dev/v1alpha1
/// kind: Datasource
/// metadata:
///   name: ds1
///   namespace: default
/// spec:
///   grafana:
///     name: grafana
///   name: prometheus
///   type: prometheus
///   access: proxy
///   url: http://prom:9090
///   orgID: 1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "grafana.searchlight.dev",
    version = "v1alpha1",
    kind = "Datasource",
    namespaced,
    status = "GrafanaObjectStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"ID","type":"integer","jsonPath":".status.externalID"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSpec {
    /// Grafana instance to register the data source with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana: Option<GrafanaRef>,

    /// Data source name in Grafana
    pub name: String,

    /// Data source plugin type (prometheus, loki, ...)
    #[serde(rename = "type")]
    pub type_: String,

    /// Access mode
    #[serde(default)]
    pub access: DatasourceAccess,

    /// Data source URL
    pub url: String,

    /// Grafana organization
    #[serde(rename = "orgID", default = "super::default_org_id")]
    pub org_id: i64,

    /// Whether this is the organization's default data source
    #[serde(default)]
    pub is_default: bool,

    /// Basic auth credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    /// Database name, for SQL data sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl Record for Datasource {
    type Status = GrafanaObjectStatus;

    fn empty(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            spec: DatasourceSpec::default(),
            status: None,
        }
    }

    fn status(&self) -> Option<&GrafanaObjectStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: GrafanaObjectStatus) {
        self.status = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: DatasourceSpec = serde_json::from_value(serde_json::json!({
            "name": "prometheus",
            "type": "prometheus",
            "url": "http://prom:9090"
        }))
        .unwrap();

        assert_eq!(spec.access, DatasourceAccess::Proxy);
        assert_eq!(spec.org_id, 1);
        assert!(!spec.is_default);
        assert!(spec.grafana.is_none());
    }

    #[test]
    fn spec_uses_grafana_field_names() {
        let spec = DatasourceSpec {
            name: "prometheus".to_string(),
            type_: "prometheus".to_string(),
            url: "http://prom:9090".to_string(),
            org_id: 2,
            is_default: true,
            access: DatasourceAccess::Direct,
            ..Default::default()
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "prometheus");
        assert_eq!(json["orgID"], 2);
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["access"], "direct");
    }

    #[test]
    fn empty_record_keeps_metadata() {
        let ds = Datasource::empty(ObjectMeta {
            name: Some("ds1".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        });

        assert_eq!(ds.metadata.name.as_deref(), Some("ds1"));
        assert!(ds.status().is_none());
        assert_eq!(ds.spec, DatasourceSpec::default());
    }
}
