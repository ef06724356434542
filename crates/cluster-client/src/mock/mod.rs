//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory object store implementing
//! `ClusterClient`, so reconcilers can be exercised without an API server.
//!
//! The store follows the API-server rules the engine depends on:
//! - every write bumps `metadata.resourceVersion`; an update carrying a stale
//!   resourceVersion fails with `Conflict`
//! - `update` never touches `status`, `update_status` touches nothing else
//! - deleting an object with finalizers only sets `deletionTimestamp`; the
//!   object disappears once an update clears the finalizers
//!
//! Objects are keyed by (group, kind, namespace, name); the version is
//! ignored so that a kind can be read back at any served version.

mod selector;

use crate::cluster_trait::ClusterClient;
use crate::error::ClientError;
use kube::api::{DynamicObject, GroupVersionKind, TypeMeta};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, String, String, String);

/// Operation an injected failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// Error returned by an injected failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Api(String),
    Conflict,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    op: MockOp,
    kind: String,
    name: Option<String>,
    failure: MockFailure,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    missing_apis: HashSet<(String, String)>,
    failures: Vec<InjectedFailure>,
    next_resource_version: u64,
    writes: Vec<(MockOp, String, String)>,
}

/// Mock ClusterClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
}

fn key_of(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        gvk.group.clone(),
        gvk.kind.clone(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn api_version(gvk: &GroupVersionKind) -> String {
    crate::typed::api_version(gvk)
}

fn spec_part(obj: &DynamicObject) -> serde_json::Value {
    let mut data = obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

impl MockClusterClient {
    /// Create an empty store where every API is served
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop serving a kind; every call on it fails with `NoKindMatch`
    pub fn remove_api(&self, group: &str, kind: &str) {
        self.state()
            .missing_apis
            .insert((group.to_string(), kind.to_string()));
    }

    /// Serve a kind again after `remove_api`
    pub fn install_api(&self, group: &str, kind: &str) {
        self.state()
            .missing_apis
            .remove(&(group.to_string(), kind.to_string()));
    }

    /// Seed an object, bypassing every API rule (for test setup)
    pub fn insert(&self, gvk: &GroupVersionKind, mut obj: DynamicObject) -> DynamicObject {
        let mut state = self.state();
        state.next_resource_version += 1;
        obj.metadata.resource_version = Some(state.next_resource_version.to_string());
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        obj.types = Some(TypeMeta {
            api_version: api_version(gvk),
            kind: gvk.kind.clone(),
        });
        let name = obj.metadata.name.clone().unwrap_or_default();
        let key = key_of(gvk, obj.metadata.namespace.as_deref(), &name);
        state.objects.insert(key, obj.clone());
        obj
    }

    /// Read an object directly from the store (for assertions)
    pub fn object(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.state().objects.get(&key_of(gvk, namespace, name)).cloned()
    }

    /// All stored objects of a kind, in key order
    pub fn objects_of_kind(&self, group: &str, kind: &str) -> Vec<DynamicObject> {
        self.state()
            .objects
            .iter()
            .filter(|((g, k, _, _), _)| g == group && k == kind)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Total number of stored objects
    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().objects.is_empty()
    }

    /// Writes performed through the trait so far, as (op, kind, name)
    pub fn writes(&self) -> Vec<(MockOp, String, String)> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Fail every matching call until `clear_failures`
    pub fn fail_on(&self, op: MockOp, kind: &str, name: Option<&str>, failure: MockFailure) {
        self.push_failure(op, kind, name, failure, None);
    }

    /// Fail only the next matching call
    pub fn fail_once(&self, op: MockOp, kind: &str, name: Option<&str>, failure: MockFailure) {
        self.push_failure(op, kind, name, failure, Some(1));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    fn push_failure(&self, op: MockOp, kind: &str, name: Option<&str>, failure: MockFailure, remaining: Option<usize>) {
        self.state().failures.push(InjectedFailure {
            op,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            failure,
            remaining,
        });
    }
}

impl MockState {
    fn check(&mut self, op: MockOp, gvk: &GroupVersionKind, name: &str) -> Result<(), ClientError> {
        if self.missing_apis.contains(&(gvk.group.clone(), gvk.kind.clone())) {
            return Err(ClientError::NoKindMatch(format!(
                "{}/{}/{}",
                gvk.group, gvk.version, gvk.kind
            )));
        }
        let hit = self.failures.iter().position(|f| {
            f.op == op
                && f.kind == gvk.kind
                && f.name.as_deref().is_none_or(|n| n == name)
                && f.remaining != Some(0)
        });
        let Some(idx) = hit else {
            return Ok(());
        };
        let failure = &mut self.failures[idx];
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
        }
        match &failure.failure {
            MockFailure::Api(message) => Err(ClientError::Api(message.clone())),
            MockFailure::Conflict => Err(ClientError::Conflict(format!("{} {} was modified", gvk.kind, name))),
        }
    }

    fn bump(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }

    fn record(&mut self, op: MockOp, gvk: &GroupVersionKind, name: &str) {
        self.writes.push((op, gvk.kind.clone(), name.to_string()));
    }

    fn stored_for_write(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<(ObjectKey, DynamicObject), ClientError> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let key = key_of(gvk, obj.metadata.namespace.as_deref(), &name);
        let stored = self
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{} {}", gvk.kind, name)))?;
        if let Some(rv) = obj.metadata.resource_version.as_deref()
            && stored.metadata.resource_version.as_deref() != Some(rv)
        {
            return Err(ClientError::Conflict(format!(
                "the object {} {} has been modified; please apply your changes to the latest version",
                gvk.kind, name
            )));
        }
        Ok((key, stored))
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClientError> {
        let mut state = self.state();
        state.check(MockOp::Get, gvk, name)?;
        Ok(state.objects.get(&key_of(gvk, namespace, name)).cloned())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let mut state = self.state();
        state.check(MockOp::List, gvk, "")?;
        let selector = selector::Selector::parse(label_selector.unwrap_or_default());
        Ok(state
            .objects
            .iter()
            .filter(|((g, k, ns, _), _)| {
                *g == gvk.group && *k == gvk.kind && namespace.is_none_or(|want| want == ns)
            })
            .filter(|(_, obj)| selector.matches(obj.metadata.labels.as_ref()))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let mut state = self.state();
        let name = obj.metadata.name.clone().unwrap_or_default();
        state.check(MockOp::Create, gvk, &name)?;
        let key = key_of(gvk, obj.metadata.namespace.as_deref(), &name);
        if state.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("{} {} already exists", gvk.kind, name)));
        }
        let mut created = obj.clone();
        created.types = Some(TypeMeta {
            api_version: api_version(gvk),
            kind: gvk.kind.clone(),
        });
        created.metadata.resource_version = Some(state.bump());
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.generation = Some(1);
        created.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        state.record(MockOp::Create, gvk, &name);
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let mut state = self.state();
        let name = obj.metadata.name.clone().unwrap_or_default();
        state.check(MockOp::Update, gvk, &name)?;
        let (key, stored) = state.stored_for_write(gvk, obj)?;

        let mut updated = obj.clone();
        updated.types = stored.types.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.creation_timestamp = stored.metadata.creation_timestamp.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        match (updated.data.as_object_mut(), stored.data.get("status")) {
            (Some(map), Some(status)) => {
                map.insert("status".to_string(), status.clone());
            }
            (Some(map), None) => {
                map.remove("status");
            }
            _ => {}
        }
        let generation = stored.metadata.generation.unwrap_or(1);
        updated.metadata.generation = Some(if spec_part(&updated) == spec_part(&stored) {
            generation
        } else {
            generation + 1
        });
        updated.metadata.resource_version = Some(state.bump());
        state.record(MockOp::Update, gvk, &name);

        let finalized = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
        if finalized {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let mut state = self.state();
        let name = obj.metadata.name.clone().unwrap_or_default();
        state.check(MockOp::UpdateStatus, gvk, &name)?;
        let (key, mut stored) = state.stored_for_write(gvk, obj)?;

        if let Some(map) = stored.data.as_object_mut() {
            match obj.data.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        stored.metadata.resource_version = Some(state.bump());
        state.record(MockOp::UpdateStatus, gvk, &name);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, ClientError> {
        let mut state = self.state();
        state.check(MockOp::Delete, gvk, name)?;
        let key = key_of(gvk, namespace, name);
        let Some(stored) = state.objects.get(&key).cloned() else {
            return Ok(false);
        };
        state.record(MockOp::Delete, gvk, name);
        if stored.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            if stored.metadata.deletion_timestamp.is_none() {
                let mut marked = stored;
                marked.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                marked.metadata.resource_version = Some(state.bump());
                state.objects.insert(key, marked);
            }
        } else {
            state.objects.remove(&key);
        }
        Ok(true)
    }

    async fn has_api(&self, gvk: &GroupVersionKind) -> Result<bool, ClientError> {
        Ok(!self
            .state()
            .missing_apis
            .contains(&(gvk.group.clone(), gvk.kind.clone())))
    }
}
