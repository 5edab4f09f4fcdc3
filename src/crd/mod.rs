//! Custom Resource Definitions for the Grafana operator
//!
//! `Datasource` and `Dashboard` records share one status shape
//! ([`GrafanaObjectStatus`]). The [`Record`] trait is what the store and apply
//! engine need to handle either kind generically.

mod dashboard;
mod datasource;
mod types;

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::core::ObjectMeta;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use dashboard::{Dashboard, DashboardSpec, DASHBOARD_FINALIZER};
pub use datasource::{BasicAuth, Datasource, DatasourceAccess, DatasourceSpec, DATASOURCE_FINALIZER};
pub use types::{
    Condition, ConditionStatus, GrafanaObjectStatus, GrafanaRef, Phase, READY_CONDITION,
};

/// API group of all Grafana records
pub const GROUP: &str = "grafana.searchlight.dev";

/// A namespaced record with a status sub-resource
pub trait Record:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Status sub-object type
    type Status: Clone + Debug + Default + PartialEq + Serialize + Send + Sync;

    /// An empty record carrying only `metadata`, used as a creation template
    fn empty(metadata: ObjectMeta) -> Self;

    /// Current status, if any has been written
    fn status(&self) -> Option<&Self::Status>;

    /// Replace the status
    fn set_status(&mut self, status: Self::Status);
}

/// Default Grafana organization for records that don't set one
pub(crate) fn default_org_id() -> i64 {
    1
}
