//! Declarative store access
//!
//! [`RecordStore`] is the seam between reconciliation logic and the API server.
//! Every failure is classified into a [`StoreError`] so callers can decide
//! between aborting, re-fetching and retrying without inspecting HTTP codes.

mod kube_store;
#[cfg(test)]
pub(crate) mod memory;

use std::str::FromStr;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use thiserror::Error;

use crate::crd::Record;

pub use kube_store::KubeStore;

/// Classified store failure
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The write was based on a stale version token
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network or server hiccup; the same request may succeed later
    #[error("transient failure: {0}")]
    Retryable(String),

    /// Anything else (forbidden, invalid, undecodable)
    #[error("{0}")]
    Fatal(String),
}

impl StoreError {
    /// Whether the record was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the write lost a version race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the same request may succeed if simply repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Namespace/name key identifying one record
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Record namespace
    pub namespace: String,
    /// Record name
    pub name: String,
}

impl ObjectKey {
    /// Create a key from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing resource
    pub fn from_resource<K: Resource>(resource: &K) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_default(),
            name: resource.name_any(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::new("", name)),
            (Some(namespace), Some(name), None) if !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(crate::Error::validation(s, "unexpected key format")),
        }
    }
}

/// Get/create/patch/update operations on namespaced records
///
/// Implementations must reject `update` and `update_status` with
/// [`StoreError::Conflict`] when the record's resource version is stale.
#[async_trait]
pub trait RecordStore<K: Record>: Send + Sync {
    /// Fetch the current record
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError>;

    /// Create a new record
    async fn create(&self, record: &K) -> Result<K, StoreError>;

    /// Apply a JSON merge patch to the record
    async fn patch(&self, key: &ObjectKey, diff: &serde_json::Value) -> Result<K, StoreError>;

    /// Replace the whole record (status excluded)
    async fn update(&self, record: &K) -> Result<K, StoreError>;

    /// Replace only the status sub-resource
    async fn update_status(&self, record: &K) -> Result<K, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Datasource, DatasourceSpec};

    #[test]
    fn key_round_trips_through_display() {
        let key = ObjectKey::new("default", "ds1");
        assert_eq!(key.to_string(), "default/ds1");
        assert_eq!("default/ds1".parse::<ObjectKey>().unwrap(), key);
    }

    #[test]
    fn key_without_namespace_is_cluster_scoped() {
        let key: ObjectKey = "ds1".parse().unwrap();
        assert_eq!(key, ObjectKey::new("", "ds1"));
        assert_eq!(key.to_string(), "ds1");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!("a/b/c".parse::<ObjectKey>().is_err());
        assert!("default/".parse::<ObjectKey>().is_err());
        assert!("".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn key_from_resource() {
        let mut ds = Datasource::new("ds1", DatasourceSpec::default());
        ds.metadata.namespace = Some("monitoring".to_string());
        assert_eq!(
            ObjectKey::from_resource(&ds),
            ObjectKey::new("monitoring", "ds1")
        );
    }

    #[test]
    fn classification_helpers() {
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(StoreError::Conflict("x".into()).is_conflict());
        assert!(StoreError::Retryable("x".into()).is_retryable());
        let fatal = StoreError::Fatal("forbidden".into());
        assert!(!fatal.is_retryable() && !fatal.is_conflict() && !fatal.is_not_found());
    }
}
