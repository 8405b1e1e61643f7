//! Feature definitions and the validating constructor
//!
//! A [`FeatureDefinition`] is plain configuration. [`create`] validates it,
//! loads its manifests, resolves a cluster client and returns a runnable
//! [`Feature`]. Nothing here writes to the cluster.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;

use feature_common::config::EngineConfig;
use feature_common::crd::Source;
use feature_common::kube_utils::{create_client, create_client_from_config};
use feature_common::template::TemplateEngine;
use feature_common::{Error, Result};

use crate::client::{ClusterClient, KubeClusterClient};
use crate::feature::{
    always_enabled, Action, EnabledFn, Feature, FeatureContext, Renderer, Stages,
};
use crate::manifest::fs::normalize_path;
use crate::manifest::{load_manifests, KustomizeCli, ManifestFs, OverlayEngine, ResourceTransform};

/// How a feature reaches the cluster
#[derive(Clone, Default)]
pub enum ClusterConnection {
    /// In-cluster credentials, falling back to the local kubeconfig
    #[default]
    Default,
    /// Explicit client configuration
    Config(kube::Config),
    /// Existing client, shared between features
    Client(Arc<dyn ClusterClient>),
}

impl ClusterConnection {
    /// Turn the connection into a client; does not contact the cluster
    pub async fn resolve(self, field_manager: &str) -> Result<Arc<dyn ClusterClient>> {
        match self {
            Self::Client(client) => Ok(client),
            Self::Config(config) => Ok(Arc::new(KubeClusterClient::new(
                create_client_from_config(config)?,
                field_manager,
            ))),
            Self::Default => Ok(Arc::new(KubeClusterClient::new(
                create_client().await?,
                field_manager,
            ))),
        }
    }
}

/// Manifest paths within one filesystem
#[derive(Clone, Debug)]
pub struct ManifestLocation {
    /// Filesystem the paths are resolved in
    pub fs: Arc<dyn ManifestFs>,
    /// Files or directories to load
    pub paths: Vec<String>,
}

/// Configuration of a feature
#[derive(Clone)]
pub struct FeatureDefinition {
    /// Feature name, unique within its namespace
    pub name: String,
    /// Namespace the feature targets; required
    pub target_namespace: Option<String>,
    /// Entity that caused the feature to exist
    pub source: Source,
    /// Owner of the feature's tracker
    pub owner: Option<OwnerReference>,
    /// Annotate created resources so later applies update them
    pub managed: bool,
    /// Whether the feature should be present; always true when unset
    pub enabled: Option<EnabledFn>,
    /// Manifest locations, loaded in order
    pub manifests: Vec<ManifestLocation>,
    /// Steps populating the data bag
    pub data_providers: Vec<Action>,
    /// Checks run before anything is applied
    pub preconditions: Vec<Action>,
    /// Programmatic cluster operations
    pub resources: Vec<Action>,
    /// Checks run after everything is applied
    pub postconditions: Vec<Action>,
    /// Steps run on cleanup, before the tracker is deleted
    pub cleanups: Vec<Action>,
    /// Enrichment applied to overlay output
    pub transforms: Vec<ResourceTransform>,
    /// Cluster connection
    pub cluster: ClusterConnection,
    /// Overlay engine; kustomize when unset
    pub overlay_engine: Option<Arc<dyn OverlayEngine>>,
    /// Engine settings
    pub config: EngineConfig,
}

/// Start a feature definition
pub fn define(name: impl Into<String>) -> FeatureDefinition {
    FeatureDefinition {
        name: name.into(),
        target_namespace: None,
        source: Source::default(),
        owner: None,
        managed: false,
        enabled: None,
        manifests: Vec::new(),
        data_providers: Vec::new(),
        preconditions: Vec::new(),
        resources: Vec::new(),
        postconditions: Vec::new(),
        cleanups: Vec::new(),
        transforms: Vec::new(),
        cluster: ClusterConnection::Default,
        overlay_engine: None,
        config: EngineConfig::default(),
    }
}

impl FeatureDefinition {
    /// Set the target namespace
    pub fn target_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.target_namespace = Some(namespace.into());
        self
    }

    /// Set the source
    pub fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    /// Set the owner of the tracker
    pub fn owned_by(mut self, owner: OwnerReference) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Mark created resources as managed
    pub fn managed(mut self) -> Self {
        self.managed = true;
        self
    }

    /// Set the enabled predicate
    pub fn enabled_when(mut self, enabled: EnabledFn) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Load the given paths from a filesystem
    pub fn manifests<I, S>(mut self, fs: Arc<dyn ManifestFs>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifests.push(ManifestLocation {
            fs,
            paths: paths.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Append data providers
    pub fn with_data(mut self, providers: impl IntoIterator<Item = Action>) -> Self {
        self.data_providers.extend(providers);
        self
    }

    /// Append programmatic resource actions
    pub fn with_resources(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.resources.extend(actions);
        self
    }

    /// Append preconditions
    pub fn pre_conditions(mut self, conditions: impl IntoIterator<Item = Action>) -> Self {
        self.preconditions.extend(conditions);
        self
    }

    /// Append postconditions
    pub fn post_conditions(mut self, conditions: impl IntoIterator<Item = Action>) -> Self {
        self.postconditions.extend(conditions);
        self
    }

    /// Append cleanup actions
    pub fn on_delete(mut self, cleanups: impl IntoIterator<Item = Action>) -> Self {
        self.cleanups.extend(cleanups);
        self
    }

    /// Use an explicit client configuration
    pub fn using_config(mut self, config: kube::Config) -> Self {
        self.cluster = ClusterConnection::Config(config);
        self
    }

    /// Use an existing client
    pub fn using_client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.cluster = ClusterConnection::Client(client);
        self
    }

    /// Use a specific overlay engine
    pub fn with_overlay_engine(mut self, engine: Arc<dyn OverlayEngine>) -> Self {
        self.overlay_engine = Some(engine);
        self
    }
}

/// Validate a definition and build the feature.
///
/// Fails without touching the cluster when the namespace is missing, a
/// manifest path is malformed, or a manifest cannot be loaded.
pub async fn create(def: FeatureDefinition) -> Result<Feature> {
    if def.name.trim().is_empty() {
        return Err(Error::validation_for_field(
            "<unnamed>",
            "name",
            "feature name is not set",
        ));
    }

    let target_namespace = def
        .target_namespace
        .filter(|ns| !ns.trim().is_empty())
        .ok_or_else(|| {
            Error::validation_for_field(&def.name, "target_namespace", "target namespace is not set")
        })?;

    let mut manifests = Vec::new();
    for location in &def.manifests {
        if location.paths.is_empty() {
            return Err(Error::validation_for_field(
                &def.name,
                "manifests",
                "manifest location set without any path",
            ));
        }
        for path in &location.paths {
            normalize_path(path)
                .map_err(|e| Error::validation_for_field(&def.name, "manifests", e.to_string()))?;
            manifests.extend(load_manifests(&location.fs, path)?);
        }
    }

    let client = def.cluster.resolve(&def.config.field_manager).await?;
    let overlay = def
        .overlay_engine
        .unwrap_or_else(|| Arc::new(KustomizeCli::new(def.config.kustomize_binary.clone())));

    debug!(
        feature = %def.name,
        namespace = %target_namespace,
        manifests = manifests.len(),
        "Created feature"
    );

    let ctx = FeatureContext::new(def.name, target_namespace, def.managed, def.source, client);
    let stages = Stages {
        data_providers: def.data_providers,
        preconditions: def.preconditions,
        resources: def.resources,
        manifests,
        postconditions: def.postconditions,
        cleanups: def.cleanups,
    };
    let renderer = Renderer {
        templates: TemplateEngine::new(),
        overlay,
        transforms: def.transforms,
    };

    Ok(Feature::new(
        ctx,
        def.enabled.unwrap_or_else(always_enabled),
        stages,
        renderer,
        def.owner,
        def.config.status_retry,
    ))
}
