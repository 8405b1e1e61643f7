//! Reusable actions for feature definitions
//!
//! Preconditions, postconditions and resource actions that most features
//! need. Waits poll the cluster until their check passes or the timeout
//! elapses; client errors during a wait are retried until then.

use std::time::Duration;

use kube::api::DynamicObject;
use serde_json::{json, Value};
use tracing::{debug, info};

use feature_common::kube_utils::{build_api_resource, poll_until};
use feature_common::Error;

use crate::client::ObjectKey;
use crate::feature::{action, Action};

/// Interval between two checks of a wait
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create a namespace unless it already exists.
///
/// The namespace gets no owner reference, so it survives the feature's
/// cleanup.
pub fn create_namespace_if_not_exists(name: impl Into<String>) -> Action {
    let name = name.into();
    action(move |ctx| {
        let name = name.clone();
        Box::pin(async move {
            let ar = build_api_resource("v1", "Namespace");
            if ctx.client().get(&ar, &ObjectKey::cluster(&name)).await?.is_some() {
                debug!(namespace = %name, "Namespace already exists");
                return Ok(());
            }

            let namespace: DynamicObject = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": name },
            }))?;
            match ctx.client().create(&ar, &namespace).await {
                Ok(_) => {
                    info!(namespace = %name, "Created namespace");
                    Ok(())
                }
                Err(e) if e.is_already_exists() => Ok(()),
                Err(e) => Err(e),
            }
        })
    })
}

/// Fail unless the named CustomResourceDefinition is installed
pub fn ensure_crd_is_installed(name: impl Into<String>) -> Action {
    let name = name.into();
    action(move |ctx| {
        let name = name.clone();
        Box::pin(async move {
            let ar = build_api_resource("apiextensions.k8s.io/v1", "CustomResourceDefinition");
            match ctx.client().get(&ar, &ObjectKey::cluster(&name)).await? {
                Some(_) => Ok(()),
                None => Err(Error::action(format!("\"{}\" not found", name))),
            }
        })
    })
}

/// Wait until the namespace has pods and every one of them is ready
pub fn wait_for_pods_ready(namespace: impl Into<String>, timeout: Duration) -> Action {
    let namespace = namespace.into();
    action(move |ctx| {
        let namespace = namespace.clone();
        Box::pin(async move {
            let client = ctx.client().as_ref();
            let ar = &build_api_resource("v1", "Pod");
            let scope = &Some(namespace.clone());
            let ns = namespace.as_str();
            let what = format!("waiting for pods in namespace {} to be ready", ns);
            poll_until(timeout, POLL_INTERVAL.min(timeout), what, || async move {
                let pods = client.list(ar, scope, &None).await?;
                let ready = pods.iter().filter(|pod| is_pod_ready(pod)).count();
                debug!(namespace = %ns, total = pods.len(), ready, "Checked pod readiness");
                Ok::<_, Error>(!pods.is_empty() && ready == pods.len())
            })
            .await
        })
    })
}

/// Wait until an object exists
pub fn wait_for_resource(
    api_version: impl Into<String>,
    kind: impl Into<String>,
    namespace: Option<String>,
    name: impl Into<String>,
    timeout: Duration,
) -> Action {
    let api_version = api_version.into();
    let kind = kind.into();
    let name = name.into();
    action(move |ctx| {
        let ar = build_api_resource(&api_version, &kind);
        let key = match &namespace {
            Some(ns) => ObjectKey::namespaced(ns, &name),
            None => ObjectKey::cluster(&name),
        };
        Box::pin(async move {
            let client = ctx.client().as_ref();
            let (ar, key) = (&ar, &key);
            let what = format!("waiting for {} {}", ar.kind, key);
            poll_until(timeout, POLL_INTERVAL.min(timeout), what, || async move {
                Ok::<_, Error>(client.get(ar, key).await?.is_some())
            })
            .await
        })
    })
}

/// Returns true if the pod reports `Ready=True`
pub fn is_pod_ready(pod: &DynamicObject) -> bool {
    pod.data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}
