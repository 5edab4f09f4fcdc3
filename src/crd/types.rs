//! Shared types for Grafana custom resources

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported on every Grafana record
pub const READY_CONDITION: &str = "Ready";

/// Reference to the Grafana instance a record belongs to
///
/// When `namespace` is omitted the record's own namespace is used.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaRef {
    /// Name of the Grafana instance (AppBinding)
    pub name: String,

    /// Namespace of the Grafana instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Coarse reconciliation outcome of a Grafana record
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Phase {
    /// Not yet synced to Grafana
    #[default]
    Pending,
    /// Grafana object matches the spec
    Current,
    /// Last sync attempt failed; see `reason`
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Current => write!(f, "Current"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Status written by the controller on Datasource and Dashboard records
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaObjectStatus {
    /// Identifier Grafana assigned on creation
    #[serde(default, rename = "externalID", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<i64>,

    /// Current phase
    #[serde(default)]
    pub phase: Phase,

    /// Why the record is in its current phase
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Generation of the spec the status describes
    #[serde(default)]
    pub observed_generation: i64,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl GrafanaObjectStatus {
    /// Mark the record as in sync with the Grafana object `external_id`
    pub fn current(mut self, external_id: i64, generation: i64) -> Self {
        self.external_id = Some(external_id);
        self.phase = Phase::Current;
        self.reason.clear();
        self.observed_generation = generation;
        self.set_condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::True,
            "Synced",
            "object is in sync with grafana",
        ));
        self
    }

    /// Mark the last sync attempt as failed
    ///
    /// `reason` is a CamelCase machine-readable code, `message` the error text.
    /// The external ID is left untouched.
    pub fn failed(
        mut self,
        reason: impl Into<String>,
        message: impl Into<String>,
        generation: i64,
    ) -> Self {
        let reason = reason.into();
        let message = message.into();
        self.phase = Phase::Failed;
        self.reason = message.clone();
        self.observed_generation = generation;
        self.set_condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            reason,
            message,
        ));
        self
    }

    /// Insert or replace the condition of the same type.
    ///
    /// The transition time only moves when the condition's status changes.
    pub fn set_condition(&mut self, mut condition: Condition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
