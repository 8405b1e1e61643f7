//! Cluster access used by features
//!
//! Everything the engine does against the cluster goes through
//! [`ClusterClient`], so features can run against a mock or an in-memory
//! cluster in tests.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use feature_common::crd::FeatureTracker;
use feature_common::{Error, Result};

/// Namespace and name of an object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing object; empty namespaces count as cluster-scoped
    pub fn of(obj: &DynamicObject) -> Self {
        Self {
            namespace: obj.namespace().filter(|ns| !ns.is_empty()),
            name: obj.name_any(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Trait abstracting the cluster operations features perform
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Get an object, `None` if it does not exist
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    /// Create an object
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an existing object
    async fn replace(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Apply a JSON merge patch to an existing object
    async fn merge_patch(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<()>;

    /// List objects, optionally within a namespace and filtered by labels
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &Option<String>,
        label_selector: &Option<String>,
    ) -> Result<Vec<DynamicObject>>;

    /// Get a FeatureTracker by name
    async fn get_tracker(&self, name: &str) -> Result<Option<FeatureTracker>>;

    /// Create a FeatureTracker
    async fn create_tracker(&self, tracker: &FeatureTracker) -> Result<FeatureTracker>;

    /// Write the status subresource of a FeatureTracker.
    ///
    /// The tracker's resourceVersion is sent along, so a stale copy fails
    /// with a conflict.
    async fn replace_tracker_status(&self, tracker: &FeatureTracker) -> Result<FeatureTracker>;

    /// Delete a FeatureTracker; deleting a missing tracker succeeds
    async fn delete_tracker(&self, name: &str) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    fn trackers(&self) -> Api<FeatureTracker> {
        Api::all(self.client.clone())
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

fn ignore_not_found<T>(result: std::result::Result<T, kube::Error>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        let api = self.api(ar, key.namespace.as_deref());
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj);
        debug!(kind = %ar.kind, object = %key, "Creating object");
        let api = self.api(ar, key.namespace.as_deref());
        Ok(api.create(&self.post_params(), obj).await?)
    }

    async fn replace(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj);
        debug!(kind = %ar.kind, object = %key, "Replacing object");
        let api = self.api(ar, key.namespace.as_deref());
        Ok(api.replace(&key.name, &self.post_params(), obj).await?)
    }

    async fn merge_patch(
        &self,
        ar: &ApiResource,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject> {
        debug!(kind = %ar.kind, object = %key, "Patching object");
        let api = self.api(ar, key.namespace.as_deref());
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        Ok(api.patch(&key.name, &params, &Patch::Merge(patch)).await?)
    }

    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<()> {
        debug!(kind = %ar.kind, object = %key, "Deleting object");
        let api = self.api(ar, key.namespace.as_deref());
        ignore_not_found(api.delete(&key.name, &DeleteParams::background()).await)
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &Option<String>,
        label_selector: &Option<String>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(ar, namespace.as_deref());
        let params = ListParams {
            label_selector: label_selector.clone(),
            ..Default::default()
        };
        Ok(api.list(&params).await?.items)
    }

    async fn get_tracker(&self, name: &str) -> Result<Option<FeatureTracker>> {
        Ok(self.trackers().get_opt(name).await?)
    }

    async fn create_tracker(&self, tracker: &FeatureTracker) -> Result<FeatureTracker> {
        Ok(self.trackers().create(&self.post_params(), tracker).await?)
    }

    async fn replace_tracker_status(&self, tracker: &FeatureTracker) -> Result<FeatureTracker> {
        let name = tracker.name_any();
        let data = serde_json::to_vec(tracker).map_err(|e| {
            Error::serialization_for_kind("FeatureTracker", e.to_string())
        })?;
        Ok(self
            .trackers()
            .replace_status(&name, &self.post_params(), data)
            .await?)
    }

    async fn delete_tracker(&self, name: &str) -> Result<()> {
        debug!(tracker = %name, "Deleting feature tracker");
        ignore_not_found(
            self.trackers()
                .delete(name, &DeleteParams::background())
                .await,
        )
    }
}
