//! In-memory cluster for unit tests

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::core::ErrorResponse;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde_json::Value;

use feature_common::crd::FeatureTracker;
use feature_common::{Error, Result};

use crate::client::{ClusterClient, ObjectKey};

/// Kubernetes API error with the given code and reason
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    }))
}

/// Owner reference to a FeatureTracker
pub fn owner_ref(name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "features.platform.dev/v1".to_string(),
        kind: "FeatureTracker".to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        ..Default::default()
    }
}

type StoreKey = (String, String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<StoreKey, DynamicObject>,
    trackers: BTreeMap<String, FeatureTracker>,
    writes: Vec<String>,
    next_id: u64,
    pending_status_conflicts: u32,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Remove every object owned, directly or transitively, by the given uid
    fn collect_garbage(&mut self, uid: &str) {
        let mut gone: HashSet<String> = HashSet::from([uid.to_string()]);
        loop {
            let orphans: Vec<StoreKey> = self
                .objects
                .iter()
                .filter(|(_, obj)| obj.owner_references().iter().any(|r| gone.contains(&r.uid)))
                .map(|(key, _)| key.clone())
                .collect();
            if orphans.is_empty() {
                return;
            }
            for key in orphans {
                if let Some(obj) = self.objects.remove(&key) {
                    if let Some(uid) = obj.uid() {
                        gone.insert(uid);
                    }
                }
            }
        }
    }
}

fn store_key(ar: &ApiResource, key: &ObjectKey) -> StoreKey {
    (
        ar.api_version.clone(),
        ar.kind.clone(),
        key.namespace.clone(),
        key.name.clone(),
    )
}

fn describe(kind: &str, key: &ObjectKey) -> String {
    format!("{} {}", kind, key)
}

/// RFC 7386 JSON merge patch
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Cluster object store with uid/resourceVersion assignment, 404/409
/// semantics and owner-reference garbage collection
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Store an object directly, bypassing write tracking
    pub fn insert(&self, mut obj: DynamicObject) {
        let types = obj.types.clone().unwrap();
        let mut state = self.lock();
        let id = state.next_id();
        obj.metadata.uid.get_or_insert_with(|| format!("uid-{}", id));
        obj.metadata.resource_version = Some(id.to_string());
        let key = (
            types.api_version,
            types.kind,
            obj.namespace(),
            obj.name_any(),
        );
        state.objects.insert(key, obj);
    }

    /// Store a tracker directly, bypassing write tracking
    pub fn insert_tracker(&self, mut tracker: FeatureTracker) -> FeatureTracker {
        let mut state = self.lock();
        let id = state.next_id();
        tracker.metadata.uid = Some(format!("uid-{}", id));
        tracker.metadata.resource_version = Some(id.to_string());
        state.trackers.insert(tracker.name_any(), tracker.clone());
        tracker
    }

    pub fn object(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<DynamicObject> {
        let key = (
            api_version.to_string(),
            kind.to_string(),
            namespace.map(str::to_string),
            name.to_string(),
        );
        self.lock().objects.get(&key).cloned()
    }

    /// Number of stored objects of a kind
    pub fn count(&self, kind: &str) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|(_, k, _, _)| k == kind)
            .count()
    }

    pub fn tracker(&self, name: &str) -> Option<FeatureTracker> {
        self.lock().trackers.get(name).cloned()
    }

    /// Writes performed through the client, e.g. `create Secret ns/name`
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    /// Make the next `n` tracker status writes fail with a conflict
    pub fn fail_status_updates_with_conflict(&self, n: u32) {
        self.lock().pending_status_conflicts = n;
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        Ok(self.lock().objects.get(&store_key(ar, key)).cloned())
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj);
        let skey = store_key(ar, &key);
        let mut state = self.lock();
        if state.objects.contains_key(&skey) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let id = state.next_id();
        let mut stored = obj.clone();
        stored.metadata.uid = Some(format!("uid-{}", id));
        stored.metadata.resource_version = Some(id.to_string());
        state.objects.insert(skey, stored.clone());
        state.writes.push(format!("create {}", describe(&ar.kind, &key)));
        Ok(stored)
    }

    async fn replace(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj);
        let skey = store_key(ar, &key);
        let mut state = self.lock();
        let Some(existing) = state.objects.get(&skey) else {
            return Err(api_error(404, "NotFound"));
        };
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != existing.metadata.resource_version
        {
            return Err(api_error(409, "Conflict"));
        }
        let uid = existing.metadata.uid.clone();
        let id = state.next_id();
        let mut stored = obj.clone();
        stored.metadata.uid = uid;
        stored.metadata.resource_version = Some(id.to_string());
        state.objects.insert(skey, stored.clone());
        state.writes.push(format!("replace {}", describe(&ar.kind, &key)));
        Ok(stored)
    }

    async fn merge_patch(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject> {
        let skey = store_key(ar, key);
        let mut state = self.lock();
        let Some(existing) = state.objects.get(&skey) else {
            return Err(api_error(404, "NotFound"));
        };
        let mut merged = serde_json::to_value(existing)?;
        merge(&mut merged, patch);
        let mut stored: DynamicObject = serde_json::from_value(merged)?;
        let id = state.next_id();
        stored.metadata.resource_version = Some(id.to_string());
        state.objects.insert(skey, stored.clone());
        state.writes.push(format!("patch {}", describe(&ar.kind, key)));
        Ok(stored)
    }

    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<()> {
        let mut state = self.lock();
        if let Some(obj) = state.objects.remove(&store_key(ar, key)) {
            state.writes.push(format!("delete {}", describe(&ar.kind, key)));
            if let Some(uid) = obj.uid() {
                state.collect_garbage(&uid);
            }
        }
        Ok(())
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &Option<String>,
        label_selector: &Option<String>,
    ) -> Result<Vec<DynamicObject>> {
        let wanted: Vec<(String, String)> = label_selector
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Ok(self
            .lock()
            .objects
            .iter()
            .filter(|((api_version, kind, ns, _), _)| {
                *api_version == ar.api_version
                    && *kind == ar.kind
                    && (namespace.is_none() || ns == namespace)
            })
            .filter(|(_, obj)| {
                wanted
                    .iter()
                    .all(|(k, v)| obj.labels().get(k).is_some_and(|actual| actual == v))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn get_tracker(&self, name: &str) -> Result<Option<FeatureTracker>> {
        Ok(self.lock().trackers.get(name).cloned())
    }

    async fn create_tracker(&self, tracker: &FeatureTracker) -> Result<FeatureTracker> {
        let name = tracker.name_any();
        let mut state = self.lock();
        if state.trackers.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let id = state.next_id();
        let mut stored = tracker.clone();
        stored.metadata.uid = Some(format!("uid-{}", id));
        stored.metadata.resource_version = Some(id.to_string());
        state.trackers.insert(name.clone(), stored.clone());
        state.writes.push(format!("create FeatureTracker {}", name));
        Ok(stored)
    }

    async fn replace_tracker_status(&self, tracker: &FeatureTracker) -> Result<FeatureTracker> {
        let name = tracker.name_any();
        let mut state = self.lock();
        if state.pending_status_conflicts > 0 {
            state.pending_status_conflicts -= 1;
            return Err(api_error(409, "Conflict"));
        }
        let Some(existing) = state.trackers.get(&name) else {
            return Err(api_error(404, "NotFound"));
        };
        if tracker.metadata.resource_version != existing.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        let mut stored = existing.clone();
        stored.status = tracker.status.clone();
        let id = state.next_id();
        stored.metadata.resource_version = Some(id.to_string());
        state.trackers.insert(name.clone(), stored.clone());
        state.writes.push(format!("status FeatureTracker {}", name));
        Ok(stored)
    }

    async fn delete_tracker(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(tracker) = state.trackers.remove(name) {
            state.writes.push(format!("delete FeatureTracker {}", name));
            if let Some(uid) = tracker.uid() {
                state.collect_garbage(&uid);
            }
        }
        Ok(())
    }
}
