//! In-memory [`RecordStore`] for tests
//!
//! Behaves like the API server where it matters to reconciliation: version
//! tokens on every write, conflicts on stale updates, status as a separate
//! sub-resource, generation bumps on spec changes, and garbage collection once a
//! deletion-marked record has no finalizers left. Failures can be injected per
//! operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde_json::Value;

use super::{ObjectKey, RecordStore, StoreError};
use crate::crd::Record;

/// Store operation, for failure injection and call accounting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Get,
    Create,
    Patch,
    Update,
    UpdateStatus,
}

struct State<K> {
    records: BTreeMap<ObjectKey, K>,
    version: u64,
    failures: HashMap<Op, VecDeque<StoreError>>,
    calls: Vec<Op>,
}

pub(crate) struct MemoryStore<K> {
    state: Mutex<State<K>>,
}

fn fatal(err: impl std::fmt::Display) -> StoreError {
    StoreError::Fatal(err.to_string())
}

impl<K: Record> MemoryStore<K> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                records: BTreeMap::new(),
                version: 0,
                failures: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// Seed a record as if an external actor had created it
    pub(crate) fn insert(&self, mut record: K) -> K {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let meta = record.meta_mut();
        meta.resource_version = Some(state.version.to_string());
        meta.generation = Some(1);
        meta.uid.get_or_insert_with(|| format!("uid-{}", state.version));
        state
            .records
            .insert(ObjectKey::from_resource(&record), record.clone());
        record
    }

    /// Current stored record
    pub(crate) fn record(&self, key: &ObjectKey) -> Option<K> {
        self.state.lock().unwrap().records.get(key).cloned()
    }

    /// Make the next call of `op` fail with `err`
    pub(crate) fn fail_next(&self, op: Op, err: StoreError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Number of calls made for `op`
    pub(crate) fn calls(&self, op: Op) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    /// Number of write calls (create, patch, update, status update)
    pub(crate) fn writes(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c != Op::Get)
            .count()
    }

    /// Set the deletion marker, as `kubectl delete` would
    pub(crate) fn mark_deleted(&self, key: &ObjectKey) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version.to_string();
        if let Some(record) = state.records.get_mut(key) {
            let meta = record.meta_mut();
            meta.deletion_timestamp = Some(Time(Utc::now()));
            meta.resource_version = Some(version);
        }
        collect_garbage(&mut state, key);
    }

    /// Mutate a stored record out of band, as a concurrent writer would
    pub(crate) fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut K)) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version.to_string();
        if let Some(record) = state.records.get_mut(key) {
            f(record);
            record.meta_mut().resource_version = Some(version);
        }
    }

    fn begin(&self, op: Op) -> Result<std::sync::MutexGuard<'_, State<K>>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op);
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

fn collect_garbage<K: Record>(state: &mut State<K>, key: &ObjectKey) {
    let collectable = state
        .records
        .get(key)
        .is_some_and(|r| r.meta().deletion_timestamp.is_some() && r.finalizers().is_empty());
    if collectable {
        state.records.remove(key);
    }
}

fn check_version<K: Record>(stored: &K, incoming: &K) -> Result<(), StoreError> {
    match incoming.resource_version() {
        Some(rv) if Some(&rv) != stored.resource_version().as_ref() => Err(StoreError::Conflict(
            format!(
                "the object has been modified; please apply your changes to the latest version ({})",
                ObjectKey::from_resource(stored)
            ),
        )),
        _ => Ok(()),
    }
}

/// Persist `next` over `stored`, stamping version and generation
fn commit<K: Record>(
    state: &mut State<K>,
    key: &ObjectKey,
    stored: &Value,
    mut next: Value,
    status_from: &Value,
) -> Result<K, StoreError> {
    if let Some(obj) = next.as_object_mut() {
        match status_from.get("status") {
            Some(status) => obj.insert("status".to_string(), status.clone()),
            None => obj.remove("status"),
        };
    }
    let spec_changed = stored.get("spec") != next.get("spec");

    let mut record: K = serde_json::from_value(next).map_err(fatal)?;
    state.version += 1;
    let generation = stored
        .pointer("/metadata/generation")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let meta = record.meta_mut();
    meta.resource_version = Some(state.version.to_string());
    meta.generation = Some(if spec_changed { generation + 1 } else { generation });

    state.records.insert(key.clone(), record.clone());
    collect_garbage(state, key);
    Ok(record)
}

#[async_trait]
impl<K: Record> RecordStore<K> for MemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError> {
        let state = self.begin(Op::Get)?;
        state
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, record: &K) -> Result<K, StoreError> {
        let mut state = self.begin(Op::Create)?;
        let key = ObjectKey::from_resource(record);
        if state.records.contains_key(&key) {
            return Err(StoreError::Fatal(format!("{key} already exists")));
        }
        state.version += 1;
        let mut created = record.clone();
        let meta = created.meta_mut();
        meta.resource_version = Some(state.version.to_string());
        meta.generation = Some(1);
        meta.uid = Some(format!("uid-{}", state.version));
        state.records.insert(key, created.clone());
        Ok(created)
    }

    async fn patch(&self, key: &ObjectKey, diff: &Value) -> Result<K, StoreError> {
        let mut state = self.begin(Op::Patch)?;
        let stored = state
            .records
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let stored = serde_json::to_value(stored).map_err(fatal)?;
        let mut next = stored.clone();
        json_patch::merge(&mut next, diff);
        commit(&mut state, key, &stored, next, &stored)
    }

    async fn update(&self, record: &K) -> Result<K, StoreError> {
        let mut state = self.begin(Op::Update)?;
        let key = ObjectKey::from_resource(record);
        let stored = state
            .records
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_version(stored, record)?;
        let stored = serde_json::to_value(stored).map_err(fatal)?;
        let next = serde_json::to_value(record).map_err(fatal)?;
        commit(&mut state, &key, &stored, next, &stored)
    }

    async fn update_status(&self, record: &K) -> Result<K, StoreError> {
        let mut state = self.begin(Op::UpdateStatus)?;
        let key = ObjectKey::from_resource(record);
        let stored = state
            .records
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_version(stored, record)?;
        let stored = serde_json::to_value(stored).map_err(fatal)?;
        let incoming = serde_json::to_value(record).map_err(fatal)?;
        commit(&mut state, &key, &stored, stored.clone(), &incoming)
    }
}
