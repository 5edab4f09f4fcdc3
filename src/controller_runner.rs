//! Controller runner - builds the futures that make up one controller per kind
//!
//! Each kind gets its own queue, a dispatcher draining it, and a watch feeding
//! it. The caller decides how to drive the returned futures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ControllerConfig;
use crate::controller::{GrafanaObject, Reconciler};
use crate::crd::{Dashboard, Datasource};
use crate::grafana::GrafanaClientProvider;
use crate::queue::{Dispatcher, WorkQueue};
use crate::store::{KubeStore, ObjectKey};
use crate::watch;

/// A controller task
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the dispatcher and watch futures for records of kind `K`
pub fn build_controller<K: GrafanaObject>(
    client: Client,
    grafana: Arc<dyn GrafanaClientProvider>,
    config: &ControllerConfig,
    shutdown: CancellationToken,
) -> Vec<ControllerFuture> {
    let kind = K::kind(&()).into_owned();
    info!(%kind, workers = config.workers, "building controller");

    let queue = Arc::new(WorkQueue::<ObjectKey>::new(config.backoff.clone()));
    let store = Arc::new(KubeStore::<K>::new(client.clone()));
    let reconciler = Arc::new(Reconciler::<K>::new(store, grafana, config.retry.clone()));
    let dispatcher = Dispatcher::new(kind, Arc::clone(&queue), config.workers, config.max_requeues);

    vec![
        Box::pin(dispatcher.run(reconciler, shutdown.clone())),
        Box::pin(watch::run(
            Api::<K>::all(client),
            queue,
            config.resync_period,
            shutdown,
        )),
    ]
}

/// Build the Datasource and Dashboard controllers
pub fn build_controllers(
    client: Client,
    grafana: Arc<dyn GrafanaClientProvider>,
    config: &ControllerConfig,
    shutdown: CancellationToken,
) -> Vec<ControllerFuture> {
    let mut futures = build_controller::<Datasource>(
        client.clone(),
        Arc::clone(&grafana),
        config,
        shutdown.clone(),
    );
    futures.extend(build_controller::<Dashboard>(client, grafana, config, shutdown));
    futures
}

/// Run all controllers until `shutdown` is cancelled
pub async fn run(
    client: Client,
    grafana: Arc<dyn GrafanaClientProvider>,
    config: ControllerConfig,
    shutdown: CancellationToken,
) {
    let controllers = build_controllers(client, grafana, &config, shutdown);
    futures::future::join_all(controllers).await;
    info!("all controllers stopped");
}
