//! Dashboard Custom Resource Definition
//!
//! A Dashboard carries a Grafana dashboard model (the JSON document Grafana
//! exports) and where to put it.

use kube::core::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{GrafanaObjectStatus, GrafanaRef};
use super::Record;

/// Finalizer guarding deletion of the Grafana dashboard
pub const DASHBOARD_FINALIZER: &str = "dashboard.grafana.searchlight.dev";

/// Dashboard specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "grafana.searchlight.dev",
    version = "v1alpha1",
    kind = "Dashboard",
    namespaced,
    status = "GrafanaObjectStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"ID","type":"integer","jsonPath":".status.externalID"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSpec {
    /// Grafana instance to publish the dashboard to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana: Option<GrafanaRef>,

    /// Dashboard model as a JSON document
    pub model: String,

    /// Folder to place the dashboard in (General when unset)
    #[serde(rename = "folderID", default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<i64>,

    /// Overwrite a dashboard with the same title or uid
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,

    /// Grafana organization
    #[serde(rename = "orgID", default = "super::default_org_id")]
    pub org_id: i64,
}

fn default_overwrite() -> bool {
    true
}

impl DashboardSpec {
    /// Parse the dashboard model
    ///
    /// The model must be a JSON object.
    pub fn parse_model(&self) -> Result<serde_json::Value, String> {
        let model: serde_json::Value =
            serde_json::from_str(&self.model).map_err(|e| format!("model is not valid JSON: {e}"))?;
        if !model.is_object() {
            return Err("model must be a JSON object".to_string());
        }
        Ok(model)
    }
}

impl Record for Dashboard {
    type Status = GrafanaObjectStatus;

    fn empty(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            spec: DashboardSpec::default(),
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
