//! Shared Kubernetes utilities using kube-rs
//!
//! Rendered manifests are applied through `DynamicObject`s, so the
//! `ApiResource` for each object is built from its apiVersion and kind.

use std::future::Future;
use std::time::Duration;

use kube::config::KubeConfigOptions;
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::{debug, trace};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build an ApiResource from an apiVersion and kind.
///
/// # Example
/// ```ignore
/// let ar = build_api_resource("apps/v1", "Deployment");
/// let api: Api<DynamicObject> = Api::namespaced_with(client, "default", &ar);
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into group and version.
///
/// ```ignore
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Kinds that live outside any namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "PriorityClass",
    "APIService",
    "IngressClass",
    "RuntimeClass",
    "CSIDriver",
    "VolumeAttachment",
    "FeatureTracker",
];

/// Returns true if resources of this kind are cluster-scoped
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Known Kubernetes resource pluralizations that the fallback rules get wrong
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("networkpolicy", "networkpolicies"),
    ("ingress", "ingresses"),
    ("ingressclass", "ingressclasses"),
    ("storageclass", "storageclasses"),
    ("priorityclass", "priorityclasses"),
    ("runtimeclass", "runtimeclasses"),
    ("gateway", "gateways"),
    ("gatewayclass", "gatewayclasses"),
    ("authorizationpolicy", "authorizationpolicies"),
    ("peerauthentication", "peerauthentications"),
    ("envoyfilter", "envoyfilters"),
    ("featuretracker", "featuretrackers"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for known types, falling back to simple
/// pluralization rules for unknown types.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Resolve cluster configuration, preferring in-cluster credentials and
/// falling back to the local kubeconfig
pub async fn default_config() -> Result<Config, Error> {
    match Config::incluster() {
        Ok(config) => Ok(config),
        Err(in_cluster) => {
            debug!(error = %in_cluster, "Not running in-cluster, falling back to kubeconfig");
            Config::from_kubeconfig(&KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })
        }
    }
}

/// Fill in default timeouts the configuration leaves unset
pub fn with_default_timeouts(mut config: Config) -> Config {
    config.connect_timeout.get_or_insert(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout.get_or_insert(DEFAULT_READ_TIMEOUT);
    config
}

/// Create a kube client from the given configuration. Timeouts already set
/// on it are kept.
pub fn create_client_from_config(config: Config) -> Result<Client, Error> {
    Client::try_from(with_default_timeouts(config)).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Create a kube client from in-cluster or local credentials
pub async fn create_client() -> Result<Client, Error> {
    create_client_from_config(default_config().await?)
}

/// Poll until a condition is met or timeout is reached
///
/// Calls `check_fn` until it returns `Ok(true)`. Errors from the check are
/// treated like an unmet condition; the last one is included in the timeout
/// error.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = tokio::time::Instant::now();
    let timeout_msg = timeout_msg.into();
    let mut last_error = None;

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!("Polling condition not yet met, retrying..."),
            Err(e) => {
                trace!(error = %e, "Polling check returned error, retrying");
                last_error = Some(e);
            }
        }

        if start.elapsed() >= timeout {
            let mut message = format!("timed out after {:?} {}", timeout, timeout_msg);
            if let Some(e) = last_error {
                message.push_str(&format!(" (last error: {})", e));
            }
            return Err(Error::action(message));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
