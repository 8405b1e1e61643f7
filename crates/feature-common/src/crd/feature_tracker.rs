//! FeatureTracker CRD - per-feature status and ownership anchor
//!
//! One cluster-scoped tracker exists per applied feature. Every resource the
//! feature creates carries an owner reference to it, so deleting the tracker
//! lets the garbage collector remove everything the feature left behind.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Reason used when a failure was not tagged with a pipeline stage
pub const REASON_FAILED: &str = "Failed";

/// Spec for a FeatureTracker
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "features.platform.dev",
    version = "v1",
    kind = "FeatureTracker",
    plural = "featuretrackers",
    status = "FeatureTrackerStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.origin.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FeatureTrackerSpec {
    /// Higher-level entity that caused the feature to exist
    #[serde(default)]
    pub origin: Source,

    /// Application namespace the feature targets
    #[serde(default)]
    pub app_namespace: String,
}

/// Kind of entity a feature originates from
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SourceType {
    /// A platform component
    Component,
    /// The cluster initialization resource
    #[serde(rename = "DSCI")]
    Dsci,
    /// Origin not recorded
    #[default]
    Unknown,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component => write!(f, "Component"),
            Self::Dsci => write!(f, "DSCI"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Origin descriptor of a feature
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Source {
    /// Kind of originating entity
    #[serde(rename = "type", default)]
    pub type_: SourceType,
    /// Name of the originating entity
    #[serde(default)]
    pub name: String,
}

impl Source {
    /// Source for a platform component
    pub fn component(name: impl Into<String>) -> Self {
        Self {
            type_: SourceType::Component,
            name: name.into(),
        }
    }

    /// Source for the cluster initialization resource
    pub fn dsci(name: impl Into<String>) -> Self {
        Self {
            type_: SourceType::Dsci,
            name: name.into(),
        }
    }
}

/// Coarse lifecycle phase of a tracked feature
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TrackerPhase {
    /// Pipeline is running
    #[default]
    Progressing,
    /// Every stage succeeded
    Available,
    /// A stage failed
    Degraded,
}

impl fmt::Display for TrackerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progressing => write!(f, "Progressing"),
            Self::Available => write!(f, "Available"),
            Self::Degraded => write!(f, "Degraded"),
        }
    }
}

/// Status for a FeatureTracker
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureTrackerStatus {
    /// Conditions, one per condition type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Current phase
    #[serde(default)]
    pub phase: TrackerPhase,
}

/// Pipeline stage a status condition refers to
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionReason {
    /// Feature was applied, or is being applied
    FeatureCreated,
    /// Precondition checks
    PreConditions,
    /// Data providers populating the data bag
    LoadTemplateData,
    /// Programmatic resource actions
    ResourceCreation,
    /// Manifest rendering and application
    ApplyManifests,
    /// Postcondition checks
    PostConditions,
}

impl ConditionReason {
    /// The reason string written to conditions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeatureCreated => "FeatureCreated",
            Self::PreConditions => "PreConditions",
            Self::LoadTemplateData => "LoadTemplateData",
            Self::ResourceCreation => "ResourceCreation",
            Self::ApplyManifests => "ApplyManifests",
            Self::PostConditions => "PostConditions",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FeatureTracker {
    /// Name of the tracker for a feature applied to an application namespace
    pub fn name_for(app_namespace: &str, feature_name: &str) -> String {
        format!("{}-{}", app_namespace, feature_name)
    }

    /// Owner reference pointing at this tracker.
    ///
    /// Returns `None` until the tracker has been persisted and has a uid.
    pub fn to_owner_reference(&self) -> Option<OwnerReference> {
        let uid = self.uid()?;
        Some(OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name_any(),
            uid,
            ..Default::default()
        })
    }
}
