use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::object::{Kind, Object, ObjectKey};
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Create,
    Update,
    UpdateStatus,
}

/// A single call recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub verb: Verb,
    pub kind: Kind,
    pub key: ObjectKey,
    /// Whether the call modified stored state.
    pub changed: bool,
}

/// An error the store should return instead of serving a call.
#[derive(Debug, Clone)]
pub enum Fault {
    Conflict { retry_after: Option<Duration> },
    Unavailable { retry_after: Option<Duration> },
    Fail(String),
}

impl Fault {
    fn to_error(&self, kind: &Kind, key: &ObjectKey) -> StoreError {
        match self {
            Fault::Conflict { retry_after } => StoreError::Conflict {
                kind: kind.clone(),
                key: key.clone(),
                retry_after: *retry_after,
            },
            Fault::Unavailable { retry_after } => StoreError::Unavailable {
                message: format!("injected fault on {kind} '{key}'"),
                retry_after: *retry_after,
            },
            Fault::Fail(message) => StoreError::Other(anyhow::anyhow!(message.clone())),
        }
    }
}

struct Injected {
    verb: Verb,
    kind: Kind,
    name: Option<String>,
    fault: Fault,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    objects: HashMap<(Kind, ObjectKey), Object>,
    revision: u64,
    uids: u64,
    log: Vec<Operation>,
    faults: Vec<Injected>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn record(&mut self, verb: Verb, kind: &Kind, key: &ObjectKey, changed: bool) {
        self.log.push(Operation {
            verb,
            kind: kind.clone(),
            key: key.clone(),
            changed,
        });
    }

    fn take_fault(&mut self, verb: Verb, kind: &Kind, key: &ObjectKey) -> Option<StoreError> {
        let index = self.faults.iter().position(|injected| {
            injected.verb == verb
                && &injected.kind == kind
                && injected.name.as_ref().is_none_or(|name| name == &key.name)
        })?;

        let error = self.faults[index].fault.to_error(kind, key);

        if let Some(remaining) = self.faults[index].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(index);
            }
        }

        self.record(verb, kind, key, false);
        Some(error)
    }

    fn insert_new(&mut self, mut object: Object) -> Object {
        self.uids += 1;
        if object.metadata.uid.is_empty() {
            object.metadata.uid = format!("uid-{:06}", self.uids);
        }
        object.metadata.resource_version = Some(self.next_revision());
        object.metadata.generation = object.metadata.generation.max(1);
        object.metadata.creation_timestamp = Some(Utc::now());

        self.objects
            .insert((object.kind.clone(), object.key()), object.clone());
        object
    }
}

/// In-memory [`ObjectStore`] with API-server-like write semantics.
///
/// * `resourceVersion` is bumped only when a write changes stored content.
/// * `metadata.generation` is bumped when `spec` changes.
/// * `update` never touches `status`, `update_status` touches only `status`.
///
/// Every call is recorded, faults can be injected per verb/kind/name, and an
/// optional latency makes concurrent behaviour observable in tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` before it is served.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds an object without recording an operation.
    pub fn insert(&self, object: Object) -> Object {
        self.state().insert_new(object)
    }

    /// Reads an object without recording an operation.
    pub fn peek(&self, kind: &Kind, key: &ObjectKey) -> Option<Object> {
        self.state().objects.get(&(kind.clone(), key.clone())).cloned()
    }

    pub fn remove(&self, kind: &Kind, key: &ObjectKey) -> Option<Object> {
        self.state().objects.remove(&(kind.clone(), key.clone()))
    }

    /// Sets the deletion timestamp, as the API server does for an object
    /// that still has finalizers.
    pub fn mark_deleted(&self, kind: &Kind, key: &ObjectKey) {
        let mut state = self.state();
        let revision = state.next_revision();
        if let Some(object) = state.objects.get_mut(&(kind.clone(), key.clone())) {
            object.metadata.deletion_timestamp = Some(Utc::now());
            object.metadata.resource_version = Some(revision);
        }
    }

    /// Makes the next `times` matching calls fail (all of them if `None`).
    pub fn inject(
        &self,
        verb: Verb,
        kind: Kind,
        name: Option<&str>,
        fault: Fault,
        times: Option<usize>,
    ) {
        if times == Some(0) {
            return;
        }

        self.state().faults.push(Injected {
            verb,
            kind,
            name: name.map(str::to_string),
            fault,
            remaining: times,
        });
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state().log.clone()
    }

    pub fn clear_operations(&self) {
        self.state().log.clear();
    }

    /// Writes that actually changed stored state.
    pub fn effective_writes(&self) -> usize {
        self.state()
            .log
            .iter()
            .filter(|op| op.verb != Verb::Get && op.changed)
            .count()
    }

    /// Highest number of calls served concurrently so far.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        // Released even when the call is dropped while sleeping.
        let guard = InFlight(&self.in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        guard
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn check_version(stored: &Object, incoming: &Object) -> Result<(), StoreError> {
    match &incoming.metadata.resource_version {
        Some(version) if Some(version) != stored.metadata.resource_version.as_ref() => {
            Err(StoreError::Conflict {
                kind: incoming.kind.clone(),
                key: incoming.key(),
                retry_after: None,
            })
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: &Kind, key: &ObjectKey) -> Result<Object, StoreError> {
        let _guard = self.enter().await;
        let mut state = self.state();

        if let Some(error) = state.take_fault(Verb::Get, kind, key) {
            return Err(error);
        }

        state.record(Verb::Get, kind, key, false);
        state
            .objects
            .get(&(kind.clone(), key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.clone(),
                key: key.clone(),
            })
    }

    async fn create(&self, object: Object) -> Result<Object, StoreError> {
        let _guard = self.enter().await;
        let mut state = self.state();
        let (kind, key) = (object.kind.clone(), object.key());

        if let Some(error) = state.take_fault(Verb::Create, &kind, &key) {
            return Err(error);
        }

        if state.objects.contains_key(&(kind.clone(), key.clone())) {
            state.record(Verb::Create, &kind, &key, false);
            return Err(StoreError::AlreadyExists { kind, key });
        }

        state.record(Verb::Create, &kind, &key, true);
        Ok(state.insert_new(object))
    }

    async fn update(&self, object: Object) -> Result<Object, StoreError> {
        let _guard = self.enter().await;
        let mut state = self.state();
        let (kind, key) = (object.kind.clone(), object.key());

        if let Some(error) = state.take_fault(Verb::Update, &kind, &key) {
            return Err(error);
        }

        let Some(stored) = state.objects.get(&(kind.clone(), key.clone())).cloned() else {
            state.record(Verb::Update, &kind, &key, false);
            return Err(StoreError::NotFound { kind, key });
        };

        if let Err(error) = check_version(&stored, &object) {
            state.record(Verb::Update, &kind, &key, false);
            return Err(error);
        }

        let mut next = object;
        next.body.remove("status");
        if let Some(status) = stored.body.get("status") {
            next.body.insert("status".to_string(), status.clone());
        }

        next.metadata.uid = stored.metadata.uid.clone();
        next.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        next.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
        next.metadata.resource_version = stored.metadata.resource_version.clone();
        next.metadata.generation = if next.spec() != stored.spec() {
            stored.metadata.generation + 1
        } else {
            stored.metadata.generation
        };

        let changed = next != stored;
        if changed {
            next.metadata.resource_version = Some(state.next_revision());
            state.objects.insert((kind.clone(), key.clone()), next.clone());
        }

        state.record(Verb::Update, &kind, &key, changed);
        Ok(next)
    }

    async fn update_status(&self, object: Object) -> Result<Object, StoreError> {
        let _guard = self.enter().await;
        let mut state = self.state();
        let (kind, key) = (object.kind.clone(), object.key());

        if let Some(error) = state.take_fault(Verb::UpdateStatus, &kind, &key) {
            return Err(error);
        }

        let Some(stored) = state.objects.get(&(kind.clone(), key.clone())).cloned() else {
            state.record(Verb::UpdateStatus, &kind, &key, false);
            return Err(StoreError::NotFound { kind, key });
        };

        if let Err(error) = check_version(&stored, &object) {
            state.record(Verb::UpdateStatus, &kind, &key, false);
            return Err(error);
        }

        let mut next = stored.clone();
        match object.body.get("status") {
            Some(status) => next.body.insert("status".to_string(), status.clone()),
            None => next.body.remove("status"),
        };

        let changed = next != stored;
        if changed {
            next.metadata.resource_version = Some(state.next_revision());
            state.objects.insert((kind.clone(), key.clone()), next.clone());
        }

        state.record(Verb::UpdateStatus, &kind, &key, changed);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map(name: &str) -> Object {
        Object::new(Kind::CONFIG_MAP, &ObjectKey::new("ns", name))
            .with("data", json!({ "key": "value" }))
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = MemoryStore::new();
        let created = store.create(config_map("cm")).await.unwrap();

        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.generation, 1);
        assert!(created.metadata.resource_version.is_some());

        let again = store.create(config_map("cm")).await;
        assert!(matches!(again, Err(StoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_noop_update_keeps_version() {
        let store = MemoryStore::new();
        let created = store.create(config_map("cm")).await.unwrap();

        let updated = store.update(created.clone()).await.unwrap();
        assert_eq!(
            updated.metadata.resource_version,
            created.metadata.resource_version
        );
        assert_eq!(store.effective_writes(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(config_map("cm")).await.unwrap();

        let mut changed = created.clone();
        changed.body.insert("data".into(), json!({ "key": "other" }));
        store.update(changed).await.unwrap();

        let mut stale = created;
        stale.body.insert("data".into(), json!({ "key": "third" }));
        let error = store.update(stale).await.unwrap_err();
        assert!(error.is_conflict());
    }

    #[tokio::test]
    async fn test_spec_change_bumps_generation() {
        let store = MemoryStore::new();
        let owner = Object::new(Kind::new("Registry"), &ObjectKey::new("ns", "reg"))
            .with("spec", json!({ "replicas": 1 }));
        let created = store.create(owner).await.unwrap();

        let mut next = created.clone();
        next.body.insert("spec".into(), json!({ "replicas": 2 }));
        let updated = store.update(next).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);

        let mut status_only = updated.clone();
        status_only
            .body
            .insert("status".into(), json!({ "observedGeneration": 2 }));
        let written = store.update_status(status_only).await.unwrap();
        assert_eq!(written.metadata.generation, 2);
        assert_eq!(written.pointer("/status/observedGeneration"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed() {
        let store = MemoryStore::new();
        store.inject(
            Verb::Create,
            Kind::CONFIG_MAP,
            Some("cm"),
            Fault::Fail("boom".into()),
            Some(1),
        );

        assert!(store.create(config_map("cm")).await.is_err());
        assert!(store.create(config_map("cm")).await.is_ok());
    }

    #[tokio::test]
    async fn test_fault_injected_zero_times_never_fires() {
        let store = MemoryStore::new();
        store.inject(
            Verb::Create,
            Kind::CONFIG_MAP,
            None,
            Fault::Fail("boom".into()),
            Some(0),
        );

        assert!(store.create(config_map("cm")).await.is_ok());
        assert!(store.get(&Kind::CONFIG_MAP, &ObjectKey::new("ns", "cm")).await.is_ok());
        assert_eq!(store.effective_writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_leaves_no_call_in_flight() {
        let store = MemoryStore::new().with_latency(Duration::from_millis(50));

        let call = store.create(config_map("cm"));
        assert!(tokio::time::timeout(Duration::from_millis(10), call).await.is_err());

        assert!(store.peek(&Kind::CONFIG_MAP, &ObjectKey::new("ns", "cm")).is_none());
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
    }
}
