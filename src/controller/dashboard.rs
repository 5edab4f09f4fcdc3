//! Dashboard sync
//!
//! The dashboard model is a JSON string in the spec. It is parsed before any
//! Grafana call, and a model that doesn't parse fails the record without a
//! requeue.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use super::GrafanaObject;
use crate::crd::{Dashboard, GrafanaRef, DASHBOARD_FINALIZER};
use crate::grafana::{Created, DashboardPayload, GrafanaClient, GrafanaError};
use crate::store::ObjectKey;
use crate::{Error, Result};

impl Dashboard {
    fn payload(&self) -> Result<DashboardPayload> {
        DashboardPayload::from_spec(&self.spec)
            .map_err(|msg| Error::validation(ObjectKey::from_resource(self).to_string(), msg))
    }
}

#[async_trait]
impl GrafanaObject for Dashboard {
    const FINALIZER: &'static str = DASHBOARD_FINALIZER;

    fn grafana_ref(&self) -> Option<&GrafanaRef> {
        self.spec.grafana.as_ref()
    }

    fn validate(&self) -> Result<()> {
        self.payload().map(|_| ())
    }

    async fn create_in(&self, client: &dyn GrafanaClient) -> Result<Created> {
        let payload = self.payload()?;
        Ok(client.create_dashboard(&payload).await?)
    }

    async fn update_in(&self, client: &dyn GrafanaClient, id: i64) -> Result<String> {
        let mut payload = self.payload()?;
        if let Some(model) = payload.dashboard.as_object_mut() {
            model.insert("id".to_string(), id.into());
        }
        debug!(dashboard = %self.name_any(), id, "sending dashboard update");
        Ok(client.update_dashboard(id, &payload).await?)
    }

    async fn delete_in(
        &self,
        client: &dyn GrafanaClient,
        id: i64,
    ) -> std::result::Result<String, GrafanaError> {
        client.delete_dashboard(id).await
    }
}
