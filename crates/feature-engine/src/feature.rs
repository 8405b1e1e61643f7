//! Feature runtime: the apply/cleanup state machine
//!
//! Apply runs the pipeline stages in a fixed order and stops at the first
//! failing stage:
//!
//! 1. data providers (`LoadTemplateData`)
//! 2. preconditions (`PreConditions`)
//! 3. resource actions (`ResourceCreation`)
//! 4. manifests (`ApplyManifests`)
//! 5. postconditions (`PostConditions`)
//!
//! The outcome is always written to the feature's tracker before `apply`
//! returns. Cleanup re-runs the data providers, then every cleanup action,
//! then deletes the tracker.

use std::sync::Arc;

use futures::future::BoxFuture;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use tracing::{debug, info, instrument, warn};

use feature_common::crd::{ConditionReason, FeatureTracker, FeatureTrackerSpec, Source};
use feature_common::retry::RetryConfig;
use feature_common::template::TemplateEngine;
use feature_common::{Error, ErrorList, Result};

use crate::applier::{apply_rendered, apply_resource, ApplyOutcome, MetaOption};
use crate::client::ClusterClient;
use crate::data::DataBag;
use crate::manifest::{Manifest, OverlayEngine, RenderEnv, ResourceTransform};
use crate::tracker::{delete_tracker, ensure_tracker, StatusReporter};

/// Step run against a feature: data provider, condition, resource action or
/// cleanup
pub type Action =
    Arc<dyn for<'a> Fn(&'a mut FeatureContext) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Predicate deciding whether a feature should be present on the cluster
pub type EnabledFn =
    Arc<dyn for<'a> Fn(&'a FeatureContext) -> BoxFuture<'a, Result<bool>> + Send + Sync>;

/// Wrap a closure as an [`Action`]
///
/// ```ignore
/// let check = action(|ctx| Box::pin(async move {
///     let ns: String = ctx.data.get("Namespace")?;
///     ...
///     Ok(())
/// }));
/// ```
pub fn action<F>(f: F) -> Action
where
    F: for<'a> Fn(&'a mut FeatureContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as an [`EnabledFn`]
pub fn enabled_when<F>(f: F) -> EnabledFn
where
    F: for<'a> Fn(&'a FeatureContext) -> BoxFuture<'a, Result<bool>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Predicate that is always true
pub fn always_enabled() -> EnabledFn {
    enabled_when(|_| Box::pin(async { Ok(true) }))
}

/// Where a feature is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureState {
    /// Not applied yet, or cleaned up
    Pending,
    /// Enabled predicate returned false
    Disabled,
    /// Pipeline running
    Progressing,
    /// Every stage succeeded
    Available,
    /// A stage failed; `None` when the failure had no stage
    Degraded(Option<ConditionReason>),
}

/// Live view of a feature handed to every action
pub struct FeatureContext {
    name: String,
    target_namespace: String,
    managed: bool,
    source: Source,
    client: Arc<dyn ClusterClient>,
    tracker: Option<FeatureTracker>,
    /// Values gathered by data providers, read by templates and actions
    pub data: DataBag,
}

impl FeatureContext {
    pub(crate) fn new(
        name: String,
        target_namespace: String,
        managed: bool,
        source: Source,
        client: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            name,
            target_namespace,
            managed,
            source,
            client,
            tracker: None,
            data: DataBag::new(),
        }
    }

    /// Feature name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace the feature targets
    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    /// Returns true if created resources are reconciled on every apply
    pub fn managed(&self) -> bool {
        self.managed
    }

    /// Entity that caused the feature to exist
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Cluster client
    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// The feature's tracker, once ensured
    pub fn tracker(&self) -> Option<&FeatureTracker> {
        self.tracker.as_ref()
    }

    /// Name of the feature's tracker
    pub fn tracker_name(&self) -> String {
        FeatureTracker::name_for(&self.target_namespace, &self.name)
    }

    /// Owner reference to the tracker, once it exists
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        self.tracker.as_ref().and_then(FeatureTracker::to_owner_reference)
    }

    /// Metadata options every created resource receives: ownership by the
    /// tracker, plus the managed annotation for managed features
    pub fn meta_options(&self) -> Result<Vec<MetaOption>> {
        let owner = self.owner_reference().ok_or_else(|| {
            Error::internal_with_context(
                "meta_options",
                format!("feature {} has no persisted tracker", self.name),
            )
        })?;
        let mut options = vec![MetaOption::OwnedBy(owner)];
        if self.managed {
            options.push(MetaOption::managed());
        }
        Ok(options)
    }

    /// Apply an object with the feature's metadata options
    pub async fn apply(&self, obj: &DynamicObject) -> Result<ApplyOutcome> {
        let options = self.meta_options()?;
        apply_resource(self.client.as_ref(), obj, &options).await
    }
}

/// Rendering collaborators owned by a feature
pub(crate) struct Renderer {
    pub(crate) templates: TemplateEngine,
    pub(crate) overlay: Arc<dyn OverlayEngine>,
    pub(crate) transforms: Vec<ResourceTransform>,
}

/// Ordered pipeline steps of a feature
#[derive(Default)]
pub(crate) struct Stages {
    pub(crate) data_providers: Vec<Action>,
    pub(crate) preconditions: Vec<Action>,
    pub(crate) resources: Vec<Action>,
    pub(crate) manifests: Vec<Manifest>,
    pub(crate) postconditions: Vec<Action>,
    pub(crate) cleanups: Vec<Action>,
}

/// A named unit of cluster configuration, created by
/// [`create`](crate::builder::create)
pub struct Feature {
    ctx: FeatureContext,
    enabled: EnabledFn,
    stages: Stages,
    renderer: Renderer,
    owner: Option<OwnerReference>,
    status_retry: RetryConfig,
    state: FeatureState,
}

impl Feature {
    pub(crate) fn new(
        ctx: FeatureContext,
        enabled: EnabledFn,
        stages: Stages,
        renderer: Renderer,
        owner: Option<OwnerReference>,
        status_retry: RetryConfig,
    ) -> Self {
        Self {
            ctx,
            enabled,
            stages,
            renderer,
            owner,
            status_retry,
            state: FeatureState::Pending,
        }
    }

    /// Feature name
    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Namespace the feature targets
    pub fn target_namespace(&self) -> &str {
        self.ctx.target_namespace()
    }

    /// Live context, including the data bag from the last run
    pub fn context(&self) -> &FeatureContext {
        &self.ctx
    }

    /// Lifecycle state after the last apply or cleanup
    pub fn state(&self) -> FeatureState {
        self.state
    }

    /// Loaded manifests, in load order
    pub fn manifests(&self) -> &[Manifest] {
        &self.stages.manifests
    }

    /// Bring the cluster in line with the feature.
    ///
    /// A disabled feature is cleaned up if it was applied before and is
    /// otherwise left alone. An error from the enabled predicate aborts
    /// without touching the cluster.
    #[instrument(skip_all, fields(feature = %self.ctx.name, namespace = %self.ctx.target_namespace))]
    pub async fn apply(&mut self) -> Result<()> {
        let enabled = (self.enabled)(&self.ctx).await?;
        let tracker_name = self.ctx.tracker_name();

        if !enabled {
            self.state = FeatureState::Disabled;
            return match self.ctx.client.get_tracker(&tracker_name).await? {
                Some(tracker) => {
                    info!("Feature disabled, cleaning up previous apply");
                    self.ctx.tracker = Some(tracker);
                    self.cleanup().await?;
                    self.state = FeatureState::Disabled;
                    Ok(())
                }
                None => {
                    debug!("Feature disabled and never applied, nothing to do");
                    Ok(())
                }
            };
        }

        let spec = FeatureTrackerSpec {
            origin: self.ctx.source.clone(),
            app_namespace: self.ctx.target_namespace.clone(),
        };
        let tracker = ensure_tracker(
            self.ctx.client.as_ref(),
            &tracker_name,
            spec,
            self.owner.as_ref(),
        )
        .await?;
        self.ctx.tracker = Some(tracker);
        self.state = FeatureState::Progressing;

        let client = self.ctx.client.clone();
        let reporter = StatusReporter::new(client.as_ref(), &tracker_name, &self.status_retry);

        let mut errors = ErrorList::new();
        errors.push_result(
            reporter
                .progressing(&format!("Applying feature [{}]", self.ctx.name))
                .await,
        );

        let outcome = run_pipeline(&mut self.ctx, &self.stages, &self.renderer).await;
        match &outcome {
            Ok(()) => {
                info!("Feature applied");
                self.state = FeatureState::Available;
            }
            Err(e) => {
                warn!(error = %e, reason = ?e.condition_reason(), "Feature apply failed");
                self.state = FeatureState::Degraded(e.condition_reason());
            }
        }

        let report = reporter.report(outcome.as_ref().err()).await;
        errors.push_result(outcome);
        errors.push_result(report);
        errors.into_result()
    }

    /// Remove the feature from the cluster.
    ///
    /// Data providers run first and a failure there aborts cleanup. After
    /// that every cleanup action runs even if an earlier one failed, and the
    /// tracker is deleted last.
    #[instrument(skip_all, fields(feature = %self.ctx.name, namespace = %self.ctx.target_namespace))]
    pub async fn cleanup(&mut self) -> Result<()> {
        run_all(&self.stages.data_providers, &mut self.ctx, ConditionReason::LoadTemplateData)
            .await?;

        let mut errors = ErrorList::new();
        for step in &self.stages.cleanups {
            if let Err(e) = step(&mut self.ctx).await {
                warn!(error = %e, "Cleanup action failed");
                errors.push(e);
            }
        }

        let tracker_name = self.ctx.tracker_name();
        errors.push_result(delete_tracker(self.ctx.client.as_ref(), &tracker_name).await);
        self.ctx.tracker = None;
        self.state = FeatureState::Pending;

        info!(failures = errors.len(), "Feature cleanup finished");
        errors.into_result()
    }
}

async fn run_pipeline(ctx: &mut FeatureContext, stages: &Stages, renderer: &Renderer) -> Result<()> {
    run_all(&stages.data_providers, ctx, ConditionReason::LoadTemplateData).await?;
    run_all(&stages.preconditions, ctx, ConditionReason::PreConditions).await?;
    run_until_failure(&stages.resources, ctx, ConditionReason::ResourceCreation).await?;
    apply_manifests(&stages.manifests, ctx, renderer)
        .await
        .map_err(|e| Error::stage(ConditionReason::ApplyManifests, e))?;
    run_all(&stages.postconditions, ctx, ConditionReason::PostConditions).await
}

/// Run every action and aggregate failures under the stage reason
async fn run_all(actions: &[Action], ctx: &mut FeatureContext, reason: ConditionReason) -> Result<()> {
    let mut errors = ErrorList::new();
    for action in actions {
        if let Err(e) = action(&mut *ctx).await {
            errors.push(e);
        }
    }
    errors
        .into_result()
        .map_err(|e| Error::stage(reason, e))
}

/// Run actions in order, stopping at the first failure
async fn run_until_failure(
    actions: &[Action],
    ctx: &mut FeatureContext,
    reason: ConditionReason,
) -> Result<()> {
    for action in actions {
        action(&mut *ctx)
            .await
            .map_err(|e| Error::stage(reason, e))?;
    }
    Ok(())
}

async fn apply_manifests(
    manifests: &[Manifest],
    ctx: &FeatureContext,
    renderer: &Renderer,
) -> Result<()> {
    if manifests.is_empty() {
        return Ok(());
    }
    let options = ctx.meta_options()?;
    let env = RenderEnv {
        templates: &renderer.templates,
        overlay: renderer.overlay.as_ref(),
        transforms: &renderer.transforms,
    };
    for manifest in manifests {
        let rendered = manifest.render(&ctx.data, &env).await?;
        debug!(
            source = %rendered.source,
            resources = rendered.resources.len(),
            patch = rendered.patch,
            "Applying manifest"
        );
        apply_rendered(ctx.client.as_ref(), &rendered, &options).await?;
    }
    Ok(())
}
