//! Grafana request bodies built from record specs

use serde::Serialize;
use serde_json::Value;

use crate::crd::{DashboardSpec, DatasourceSpec};

/// Data source as Grafana's `/api/datasources` expects it
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourcePayload {
    /// Organization
    pub org_id: i64,
    /// Display name
    pub name: String,
    /// Plugin type
    #[serde(rename = "type")]
    pub type_: String,
    /// `proxy` or `direct`
    pub access: String,
    /// Data source URL
    pub url: String,
    /// Organization default
    pub is_default: bool,
    /// Whether basic auth is enabled
    pub basic_auth: bool,
    /// Basic auth user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth_user: Option<String>,
    /// Basic auth password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth_password: Option<String>,
    /// Database name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl From<&DatasourceSpec> for DatasourcePayload {
    fn from(spec: &DatasourceSpec) -> Self {
        Self {
            org_id: spec.org_id,
            name: spec.name.clone(),
            type_: spec.type_.clone(),
            access: spec.access.to_string(),
            url: spec.url.clone(),
            is_default: spec.is_default,
            basic_auth: spec.basic_auth.is_some(),
            basic_auth_user: spec.basic_auth.as_ref().map(|a| a.user.clone()),
            basic_auth_password: spec.basic_auth.as_ref().map(|a| a.password.clone()),
            database: spec.database.clone(),
        }
    }
}

/// Dashboard as Grafana's `/api/dashboards/db` expects it
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPayload {
    /// The dashboard model
    pub dashboard: Value,
    /// Target folder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<i64>,
    /// Replace an existing dashboard with the same uid or title
    pub overwrite: bool,
    /// Organization, sent as the `X-Grafana-Org-Id` header
    #[serde(skip)]
    pub org_id: i64,
}

impl DashboardPayload {
    /// Build the request body, parsing the model
    pub fn from_spec(spec: &DashboardSpec) -> Result<Self, String> {
        Ok(Self {
            dashboard: spec.parse_model()?,
            folder_id: spec.folder_id,
            overwrite: spec.overwrite,
            org_id: spec.org_id,
        })
    }
}
