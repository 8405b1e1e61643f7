//! Feature engine: applies named units of cluster configuration
//!
//! A feature gathers data, checks preconditions, creates resources from code
//! and manifests, checks postconditions, and records the outcome on a
//! cluster-scoped `FeatureTracker` that owns everything it created.
//!
//! - **Builder**: [`define`] a feature and [`create`] it
//! - **Manifests**: raw, templated and overlay sources rendered into objects
//! - **Applier**: idempotent create-or-update gated by the managed annotation
//! - **Feature**: the apply/cleanup state machine
//! - **Tracker**: tracker lifecycle and conflict-retrying status updates
//! - **Handler**: ordered apply and reverse-ordered delete of many features

#![deny(missing_docs)]

pub mod applier;
pub mod builder;
pub mod client;
pub mod conditions;
pub mod data;
pub mod feature;
pub mod handler;
pub mod manifest;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use applier::{ApplyOutcome, MetaOption};
pub use builder::{create, define, ClusterConnection, FeatureDefinition};
pub use client::{ClusterClient, KubeClusterClient, ObjectKey};
pub use data::DataBag;
pub use feature::{
    action, always_enabled, enabled_when, Action, EnabledFn, Feature, FeatureContext,
    FeatureState,
};
pub use handler::{
    provider, ConditionReporter, FeaturesHandler, FeaturesProvider, FeaturesRegistry,
    HandlerOperation, HandlerWithReporter,
};
pub use manifest::{DiskFs, Manifest, ManifestFs, MemoryFs};
