//! Features handler: applies an ordered set of features
//!
//! Providers are re-evaluated on every call, so `delete` works from the same
//! provider list as `apply` without any state kept in between. Every feature
//! is attempted and failures are aggregated.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, instrument, warn};

use feature_common::config::EngineConfig;
use feature_common::crd::{Source, SourceType};
use feature_common::{Error, ErrorList, Result};

use crate::builder::{create, ClusterConnection, FeatureDefinition};
use crate::feature::Feature;
use crate::manifest::ResourceTransform;

/// Registry feature providers add their definitions to
pub trait FeaturesRegistry {
    /// Register definitions; names must be unique within the handler
    fn add(&mut self, definitions: Vec<FeatureDefinition>) -> Result<()>;
}

/// Function registering feature definitions with a handler
pub type FeaturesProvider =
    Arc<dyn Fn(&mut dyn FeaturesRegistry) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`FeaturesProvider`]
pub fn provider<F>(f: F) -> FeaturesProvider
where
    F: Fn(&mut dyn FeaturesRegistry) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
struct Registry {
    definitions: Vec<FeatureDefinition>,
    names: HashSet<String>,
}

impl FeaturesRegistry for Registry {
    fn add(&mut self, definitions: Vec<FeatureDefinition>) -> Result<()> {
        let mut errors = ErrorList::new();
        for def in definitions {
            if !self.names.insert(def.name.clone()) {
                errors.push(Error::validation_for(
                    &def.name,
                    "feature is registered more than once",
                ));
                continue;
            }
            self.definitions.push(def);
        }
        errors.into_result()
    }
}

/// Applies and deletes the features of one owner
#[derive(Clone)]
pub struct FeaturesHandler {
    target_namespace: String,
    source: Source,
    owner: Option<OwnerReference>,
    providers: Vec<FeaturesProvider>,
    cluster: ClusterConnection,
    config: EngineConfig,
}

impl FeaturesHandler {
    /// Handler for cluster-wide features, owned by the cluster
    /// initialization resource
    pub fn for_cluster(
        owner: OwnerReference,
        applications_namespace: impl Into<String>,
        providers: Vec<FeaturesProvider>,
    ) -> Self {
        Self {
            target_namespace: applications_namespace.into(),
            source: Source::dsci(owner.name.clone()),
            owner: Some(owner),
            providers,
            cluster: ClusterConnection::Default,
            config: EngineConfig::default(),
        }
    }

    /// Handler for the features of one component
    pub fn for_component(
        owner: OwnerReference,
        component_name: impl Into<String>,
        target_namespace: impl Into<String>,
        providers: Vec<FeaturesProvider>,
    ) -> Self {
        Self {
            target_namespace: target_namespace.into(),
            source: Source::component(component_name),
            owner: Some(owner),
            providers,
            cluster: ClusterConnection::Default,
            config: EngineConfig::default(),
        }
    }

    /// Handler without features; apply and delete do nothing
    pub fn empty() -> Self {
        Self {
            target_namespace: String::new(),
            source: Source::default(),
            owner: None,
            providers: Vec::new(),
            cluster: ClusterConnection::Default,
            config: EngineConfig::default(),
        }
    }

    /// Use the given cluster connection for every feature
    pub fn with_cluster(mut self, cluster: ClusterConnection) -> Self {
        self.cluster = cluster;
        self
    }

    /// Use the given engine settings for every feature
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Namespace injected into every feature
    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    /// Source injected into every feature
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Apply every feature in registration order
    #[instrument(skip_all, fields(namespace = %self.target_namespace, source = %self.source.name))]
    pub async fn apply(&self) -> Result<()> {
        let mut features = self.features().await?;

        let mut errors = ErrorList::new();
        for feature in features.iter_mut() {
            if let Err(e) = feature.apply().await {
                warn!(feature = %feature.name(), error = %e, "Failed applying feature");
                errors.push(Error::for_feature(feature.name(), e));
            }
        }

        info!(features = features.len(), failures = errors.len(), "Applied features");
        errors.into_result()
    }

    /// Clean up every feature in reverse registration order
    #[instrument(skip_all, fields(namespace = %self.target_namespace, source = %self.source.name))]
    pub async fn delete(&self) -> Result<()> {
        let mut features = self.features().await?;

        let mut errors = ErrorList::new();
        for feature in features.iter_mut().rev() {
            if let Err(e) = feature.cleanup().await {
                warn!(feature = %feature.name(), error = %e, "Failed cleaning up feature");
                errors.push(Error::for_feature(feature.name(), e));
            }
        }

        info!(features = features.len(), failures = errors.len(), "Deleted features");
        errors.into_result()
    }

    /// Evaluate every provider and create the features it registered.
    ///
    /// Any provider or creation failure fails the whole call, before a
    /// single feature touches the cluster.
    async fn features(&self) -> Result<Vec<Feature>> {
        let mut registry = Registry::default();
        for provider in &self.providers {
            provider(&mut registry)?;
        }
        if registry.definitions.is_empty() {
            return Ok(Vec::new());
        }

        let client = self
            .cluster
            .clone()
            .resolve(&self.config.field_manager)
            .await?;
        let transforms = self.transforms();

        let mut features = Vec::with_capacity(registry.definitions.len());
        let mut errors = ErrorList::new();
        for mut def in registry.definitions {
            def.target_namespace = Some(self.target_namespace.clone());
            def.source = self.source.clone();
            if let Some(owner) = &self.owner {
                def.owner = Some(owner.clone());
            }
            def.transforms.extend(transforms.iter().cloned());
            if matches!(def.cluster, ClusterConnection::Default) {
                def.cluster = ClusterConnection::Client(client.clone());
            }
            def.config = self.config.clone();

            match create(def).await {
                Ok(feature) => features.push(feature),
                Err(e) => errors.push(e),
            }
        }
        errors.into_result()?;

        debug!(features = features.len(), "Created features");
        Ok(features)
    }

    fn transforms(&self) -> Vec<ResourceTransform> {
        let mut transforms = vec![ResourceTransform::SetNamespace(self.target_namespace.clone())];
        if self.source.type_ == SourceType::Component {
            transforms.push(ResourceTransform::component_labels(&self.source.name));
        }
        transforms
    }
}

/// Operation a handler outcome belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerOperation {
    /// [`FeaturesHandler::apply`]
    Apply,
    /// [`FeaturesHandler::delete`]
    Delete,
}

impl fmt::Display for HandlerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Reports a handler outcome on the owning resource, typically as a status
/// condition
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConditionReporter: Send + Sync {
    /// Record the outcome of an operation
    async fn report(&self, operation: HandlerOperation, outcome: &Result<()>) -> Result<()>;
}

/// Handler whose outcomes are reported through a [`ConditionReporter`]
pub struct HandlerWithReporter<R> {
    handler: FeaturesHandler,
    reporter: R,
}

impl<R: ConditionReporter> HandlerWithReporter<R> {
    /// Wrap a handler
    pub fn new(handler: FeaturesHandler, reporter: R) -> Self {
        Self { handler, reporter }
    }

    /// Wrapped handler
    pub fn handler(&self) -> &FeaturesHandler {
        &self.handler
    }

    /// Apply, then report; returns the errors of both
    pub async fn apply(&self) -> Result<()> {
        let outcome = self.handler.apply().await;
        self.finish(HandlerOperation::Apply, outcome).await
    }

    /// Delete, then report; returns the errors of both
    pub async fn delete(&self) -> Result<()> {
        let outcome = self.handler.delete().await;
        self.finish(HandlerOperation::Delete, outcome).await
    }

    async fn finish(&self, operation: HandlerOperation, outcome: Result<()>) -> Result<()> {
        let report = self.reporter.report(operation, &outcome).await;
        if let Err(e) = &report {
            warn!(%operation, error = %e, "Failed reporting handler outcome");
        }
        let mut errors = ErrorList::new();
        errors.push_result(outcome);
        errors.push_result(report);
        errors.into_result()
    }
}
