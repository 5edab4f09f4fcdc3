//! Finalizer helpers
//!
//! The add/remove helpers take and return an owned record so they can be used
//! directly as apply-engine mutators.

use kube::{Resource, ResourceExt};

/// Check whether `obj` carries `finalizer`
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Append `finalizer` unless already present
pub fn add_finalizer<K: Resource>(mut obj: K, finalizer: &str) -> K {
    if !has_finalizer(&obj, finalizer) {
        obj.finalizers_mut().push(finalizer.to_string());
    }
    obj
}

/// Drop every occurrence of `finalizer`
pub fn remove_finalizer<K: Resource>(mut obj: K, finalizer: &str) -> K {
    if has_finalizer(&obj, finalizer) {
        obj.finalizers_mut().retain(|f| f != finalizer);
    }
    obj
}

/// Whether the record has been marked for deletion
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Datasource, DatasourceSpec};

    #[test]
    fn add_is_idempotent() {
        let ds = Datasource::new("ds1", DatasourceSpec::default());
        let ds = add_finalizer(ds, "a");
        let ds = add_finalizer(ds, "a");
        assert_eq!(ds.finalizers(), ["a".to_string()]);
        assert!(has_finalizer(&ds, "a"));
    }

    #[test]
    fn remove_keeps_other_finalizers_in_order() {
        let mut ds = Datasource::new("ds1", DatasourceSpec::default());
        ds.metadata.finalizers = Some(vec!["x".into(), "a".into(), "y".into()]);

        let ds = remove_finalizer(ds, "a");

        assert_eq!(ds.finalizers(), ["x".to_string(), "y".to_string()]);
        assert!(!has_finalizer(&ds, "a"));
    }

    #[test]
    fn remove_missing_finalizer_is_noop() {
        let ds = Datasource::new("ds1", DatasourceSpec::default());
        let ds = remove_finalizer(ds, "a");
        assert!(ds.metadata.finalizers.is_none());
        assert!(!is_deleting(&ds));
    }
}
