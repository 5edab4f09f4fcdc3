//! Grafana operator - keeps Grafana datasources and dashboards in sync with
//! Kubernetes records
//!
//! Each `Datasource` or `Dashboard` record is mirrored into a Grafana instance.
//! The operator creates the Grafana object, stores its id in the record status,
//! pushes later spec changes to it and deletes it again behind a finalizer.
//!
//! # Architecture
//!
//! - A watch per kind turns events into `namespace/name` keys on a work queue
//! - A fixed pool of workers drains each queue, one reconcile per key at a time
//! - Reconcilers read the record, talk to Grafana and write back through the
//!   apply engine, which patches only what changed and retries conflicts
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Datasource, Dashboard)
//! - [`store`] - Record store abstraction and its Kubernetes implementation
//! - [`apply`] - Create-or-patch, patch, update and status update with retry
//! - [`controller`] - Lifecycle reconciliation against Grafana
//! - [`grafana`] - Grafana client interface and instance registry
//! - [`queue`] - Deduplicating work queue and worker dispatcher
//! - [`watch`] - Watch adapter feeding the queue
//! - [`controller_runner`] - Wires stores, queues, watches and workers per kind
//! - [`config`] - Environment-driven controller settings
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod apply;
pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod crd;
pub mod error;
pub mod grafana;
pub mod kube_utils;
pub mod queue;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod watch;

pub use config::ControllerConfig;
pub use controller::{GrafanaObject, LifecycleState, Reconciler};
pub use error::Error;
pub use queue::{Dispatcher, Reconcile, WorkQueue};
pub use store::{KubeStore, ObjectKey, RecordStore, StoreError};

/// Result type alias using our custom Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
