//! Error types for the Grafana operator
//!
//! Errors carry enough context (record kind and key) to be logged once by the
//! dispatcher. [`Error::is_retryable`] drives the requeue decision: transient
//! store and Grafana failures are requeued with backoff, while validation and
//! missing-identifier errors need the record to be fixed first.

use thiserror::Error;

use crate::grafana::GrafanaError;
use crate::store::StoreError;

/// Main error type for reconciliation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Declarative store error that could not be resolved locally
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Grafana API error
    #[error("grafana error: {0}")]
    Grafana(#[from] GrafanaError),

    /// Deletion requested for an object that was never created in Grafana
    #[error("{kind} {key} can't be deleted: external ID is missing")]
    MissingExternalId {
        /// Record kind (Datasource, Dashboard)
        kind: String,
        /// Namespace/name of the record
        key: String,
    },

    /// A retrying store operation ran out of budget
    #[error("failed to {action} {kind} {key} after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// What was being attempted ("update", "update status of")
        action: String,
        /// Record kind
        kind: String,
        /// Namespace/name of the record
        key: String,
        /// Number of attempts made before giving up
        attempts: u32,
        /// The last error observed, or "timed out" if none was recorded
        last_error: String,
    },

    /// Record spec is invalid and can't be sent to Grafana
    #[error("validation error for {key}: {message}")]
    Validation {
        /// Namespace/name of the record
        key: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid controller configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a missing-external-ID error for a record
    pub fn missing_external_id(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingExternalId {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a validation error for a record
    pub fn validation(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error from anything displayable
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build the aggregated error returned when a retry loop gives up
    pub fn retry_exhausted(
        action: impl Into<String>,
        kind: impl Into<String>,
        key: impl Into<String>,
        attempts: u32,
        last_error: Option<&StoreError>,
    ) -> Self {
        Self::RetryExhausted {
            action: action.into(),
            kind: kind.into(),
            key: key.into(),
            attempts,
            last_error: last_error
                .map(ToString::to_string)
                .unwrap_or_else(|| "timed out".to_string()),
        }
    }

    /// Check if this error is worth requeueing
    ///
    /// NotFound means the record vanished; the next watch event will surface it
    /// again if it comes back. Fatal store errors, Grafana rejecting the object,
    /// validation errors and a missing external ID all need someone to change
    /// the record.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(e) => e.is_retryable() || e.is_conflict(),
            Error::Grafana(e) => e.is_retryable(),
            Error::MissingExternalId { .. } => false,
            Error::RetryExhausted { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization(_) => false,
            Error::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_external_id_is_terminal() {
        let err = Error::missing_external_id("Datasource", "default/ds1");
        assert_eq!(
            err.to_string(),
            "Datasource default/ds1 can't be deleted: external ID is missing"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_errors_follow_their_classification() {
        assert!(!Error::from(StoreError::NotFound("gone".into())).is_retryable());
        assert!(Error::from(StoreError::Conflict("stale".into())).is_retryable());
        assert!(Error::from(StoreError::Retryable("timeout".into())).is_retryable());
        assert!(!Error::from(StoreError::Fatal("forbidden".into())).is_retryable());
    }

    #[test]
    fn grafana_errors_are_requeued() {
        let err = Error::from(GrafanaError::request("connection refused"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn retry_exhausted_names_attempt_count() {
        let last = StoreError::Conflict("object has been modified".into());
        let err = Error::retry_exhausted("update status of", "Datasource", "ns/a", 7, Some(&last));
        let msg = err.to_string();
        assert!(msg.contains("after 7 attempts"));
        assert!(msg.contains("update status of Datasource ns/a"));
        assert!(msg.contains("object has been modified"));

        let err = Error::retry_exhausted("update", "Dashboard", "ns/b", 3, None);
        assert!(err.to_string().ends_with("timed out"));
    }

    #[test]
    fn validation_errors_are_not_requeued() {
        let err = Error::validation("ns/dash", "model is not valid JSON");
        assert!(err.to_string().contains("ns/dash"));
        assert!(!err.is_retryable());
    }
}
