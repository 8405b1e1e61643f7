//! Idempotent application of rendered resources
//!
//! - apply mode: create the object when it is missing; replace it only when
//!   the live object is annotated as managed, otherwise leave it alone
//! - patch mode: merge-patch an existing object; a missing object is an error

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::{debug, info};

use feature_common::kube_utils::build_api_resource;
use feature_common::{Error, Result, MANAGED_ANNOTATION};

use crate::client::{ClusterClient, ObjectKey};
use crate::manifest::RenderedManifest;

/// Metadata mutation applied to every object before it is applied
#[derive(Clone, Debug, PartialEq)]
pub enum MetaOption {
    /// Add an owner reference, unless one with the same uid is present
    OwnedBy(OwnerReference),
    /// Set an annotation
    Annotate {
        /// Annotation key
        key: String,
        /// Annotation value
        value: String,
    },
}

impl MetaOption {
    /// Annotation marking the object as reconciled on every apply
    pub fn managed() -> Self {
        Self::Annotate {
            key: MANAGED_ANNOTATION.to_string(),
            value: "true".to_string(),
        }
    }

    /// Apply the option to an object
    pub fn apply(&self, obj: &mut DynamicObject) {
        match self {
            Self::OwnedBy(owner) => {
                let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
                if !refs.iter().any(|r| r.uid == owner.uid) {
                    refs.push(owner.clone());
                }
            }
            Self::Annotate { key, value } => {
                obj.metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert(key.clone(), value.clone());
            }
        }
    }
}

/// What happened to an object in apply mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Object did not exist and was created
    Created,
    /// Object existed, was managed, and was replaced
    Updated,
    /// Object existed and was left untouched
    Unchanged,
}

/// Returns true if the object carries the managed annotation set to `true`
pub fn is_managed(obj: &DynamicObject) -> bool {
    obj.annotations()
        .get(MANAGED_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// ApiResource for an object from its apiVersion and kind
pub fn api_resource_of(obj: &DynamicObject) -> Result<ApiResource> {
    let types = obj.types.as_ref().ok_or_else(|| {
        Error::validation(format!(
            "object {} has no apiVersion/kind",
            obj.name_any()
        ))
    })?;
    Ok(build_api_resource(&types.api_version, &types.kind))
}

/// Apply every resource of a rendered manifest, stopping at the first failure
pub async fn apply_rendered(
    client: &dyn ClusterClient,
    rendered: &RenderedManifest,
    options: &[MetaOption],
) -> Result<()> {
    for obj in &rendered.resources {
        if rendered.patch {
            patch_resource(client, obj).await?;
        } else {
            apply_resource(client, obj, options).await?;
        }
    }
    Ok(())
}

/// Create the object if missing, replace it if it is managed
pub async fn apply_resource(
    client: &dyn ClusterClient,
    obj: &DynamicObject,
    options: &[MetaOption],
) -> Result<ApplyOutcome> {
    let mut desired = obj.clone();
    for option in options {
        option.apply(&mut desired);
    }

    let ar = api_resource_of(&desired)?;
    let key = ObjectKey::of(&desired);

    match client.get(&ar, &key).await? {
        None => match client.create(&ar, &desired).await {
            Ok(_) => {
                info!(kind = %ar.kind, object = %key, "Created resource");
                Ok(ApplyOutcome::Created)
            }
            Err(e) if e.is_already_exists() => {
                debug!(kind = %ar.kind, object = %key, "Resource created concurrently");
                Ok(ApplyOutcome::Unchanged)
            }
            Err(e) => Err(e),
        },
        Some(existing) if is_managed(&existing) => {
            desired.metadata.resource_version = existing.metadata.resource_version.clone();
            client.replace(&ar, &desired).await?;
            info!(kind = %ar.kind, object = %key, "Updated managed resource");
            Ok(ApplyOutcome::Updated)
        }
        Some(_) => {
            debug!(kind = %ar.kind, object = %key, "Resource exists and is not managed, skipping");
            Ok(ApplyOutcome::Unchanged)
        }
    }
}

/// Merge-patch an existing object with the given document
pub async fn patch_resource(client: &dyn ClusterClient, patch: &DynamicObject) -> Result<()> {
    let ar = api_resource_of(patch)?;
    let key = ObjectKey::of(patch);
    let body = serde_json::to_value(patch)?;
    client.merge_patch(&ar, &key, &body).await?;
    info!(kind = %ar.kind, object = %key, "Patched resource");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::testing::{api_error, owner_ref, FakeCluster};
    use serde_json::json;

    fn secret(name: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": name, "namespace": "svc-ns"},
            "stringData": {"key": "value"}
        }))
        .unwrap()
    }

    #[test]
    fn test_meta_options() {
        let mut obj = secret("s");
        let owner = owner_ref("tracker", "uid-1");
        MetaOption::OwnedBy(owner.clone()).apply(&mut obj);
        MetaOption::OwnedBy(owner).apply(&mut obj);
        MetaOption::managed().apply(&mut obj);

        assert_eq!(obj.owner_references().len(), 1);
        assert!(is_managed(&obj));
    }

    #[tokio::test]
    async fn test_apply_creates_missing_object_with_options() {
        let cluster = FakeCluster::new();
        let options = vec![MetaOption::OwnedBy(owner_ref("tracker", "uid-1"))];

        let outcome = apply_resource(&cluster, &secret("s"), &options).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);

        let stored = cluster.object("v1", "Secret", Some("svc-ns"), "s").unwrap();
        assert_eq!(stored.owner_references()[0].uid, "uid-1");
        assert!(!is_managed(&stored));
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let cluster = FakeCluster::new();
        let options = vec![MetaOption::OwnedBy(owner_ref("tracker", "uid-1"))];

        apply_resource(&cluster, &secret("s"), &options).await.unwrap();
        let second = apply_resource(&cluster, &secret("s"), &options).await.unwrap();

        assert_eq!(second, ApplyOutcome::Unchanged);
        assert_eq!(cluster.count("Secret"), 1);
    }

    #[tokio::test]
    async fn test_apply_replaces_only_managed_objects() {
        let cluster = FakeCluster::new();
        let mut unmanaged = secret("user-owned");
        unmanaged.data = json!({"stringData": {"key": "user"}});
        cluster.insert(unmanaged);

        let mut managed = secret("ours");
        MetaOption::managed().apply(&mut managed);
        managed.data = json!({"stringData": {"key": "old"}});
        cluster.insert(managed);

        let options = vec![MetaOption::managed()];
        assert_eq!(
            apply_resource(&cluster, &secret("user-owned"), &options).await.unwrap(),
            ApplyOutcome::Unchanged
        );
        assert_eq!(
            apply_resource(&cluster, &secret("ours"), &options).await.unwrap(),
            ApplyOutcome::Updated
        );

        let user = cluster.object("v1", "Secret", Some("svc-ns"), "user-owned").unwrap();
        assert_eq!(user.data["stringData"]["key"], "user");
        let ours = cluster.object("v1", "Secret", Some("svc-ns"), "ours").unwrap();
        assert_eq!(ours.data["stringData"]["key"], "value");
    }

    #[tokio::test]
    async fn test_create_race_already_exists_is_success() {
        let mut client = MockClusterClient::new();
        client.expect_get().returning(|_, _| Ok(None));
        client
            .expect_create()
            .returning(|_, _| Err(api_error(409, "AlreadyExists")));

        let outcome = apply_resource(&client, &secret("s"), &[]).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_get_failure_propagates() {
        let mut client = MockClusterClient::new();
        client
            .expect_get()
            .returning(|_, _| Err(api_error(403, "Forbidden")));
        client.expect_create().never();

        let err = apply_resource(&client, &secret("s"), &[]).await.unwrap_err();
        assert_eq!(err.api_error().map(|e| e.code), Some(403));
    }

    #[tokio::test]
    async fn test_patch_mode_merges_into_existing() {
        let cluster = FakeCluster::new();
        cluster.insert(secret("s"));

        let patch: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "s", "namespace": "svc-ns", "labels": {"patched": "yes"}}
        }))
        .unwrap();
        let rendered = RenderedManifest {
            source: "s.patch.yaml".to_string(),
            patch: true,
            resources: vec![patch],
        };

        apply_rendered(&cluster, &rendered, &[MetaOption::managed()])
            .await
            .unwrap();

        let stored = cluster.object("v1", "Secret", Some("svc-ns"), "s").unwrap();
        assert_eq!(stored.labels()["patched"], "yes");
        assert_eq!(stored.data["stringData"]["key"], "value");
        assert!(!is_managed(&stored));
    }

    #[tokio::test]
    async fn test_patch_mode_missing_object_is_not_found() {
        let cluster = FakeCluster::new();
        let rendered = RenderedManifest {
            source: "s.patch.yaml".to_string(),
            patch: true,
            resources: vec![secret("missing")],
        };

        let err = apply_rendered(&cluster, &rendered, &[]).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cluster.count("Secret"), 0);
    }

    #[tokio::test]
    async fn test_apply_rendered_stops_at_first_failure() {
        let mut client = MockClusterClient::new();
        client.expect_get().returning(|_, _| Ok(None));
        client
            .expect_create()
            .times(1)
            .returning(|_, _| Err(api_error(422, "Invalid")));

        let rendered = RenderedManifest {
            source: "secrets.yaml".to_string(),
            patch: false,
            resources: vec![secret("a"), secret("b")],
        };
        assert!(apply_rendered(&client, &rendered, &[]).await.is_err());
    }
}
