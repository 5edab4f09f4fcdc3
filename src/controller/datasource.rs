//! Datasource sync

use async_trait::async_trait;

use super::GrafanaObject;
use crate::crd::{Datasource, GrafanaRef, DATASOURCE_FINALIZER};
use crate::grafana::{Created, DatasourcePayload, GrafanaClient, GrafanaError};
use crate::Result;

#[async_trait]
impl GrafanaObject for Datasource {
    const FINALIZER: &'static str = DATASOURCE_FINALIZER;

    fn grafana_ref(&self) -> Option<&GrafanaRef> {
        self.spec.grafana.as_ref()
    }

    async fn create_in(&self, client: &dyn GrafanaClient) -> Result<Created> {
        let payload = DatasourcePayload::from(&self.spec);
        Ok(client.create_datasource(&payload).await?)
    }

    async fn update_in(&self, client: &dyn GrafanaClient, id: i64) -> Result<String> {
        let payload = DatasourcePayload::from(&self.spec);
        Ok(client.update_datasource(id, &payload).await?)
    }

    async fn delete_in(
        &self,
        client: &dyn GrafanaClient,
        id: i64,
    ) -> std::result::Result<String, GrafanaError> {
        client.delete_datasource(id).await
    }
}
