//! Common types for the feature engine: tracker CRD, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod template;
pub mod yaml;

pub use error::{Error, ErrorList};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Annotation marking an object as reconciled by the engine on every apply
pub const MANAGED_ANNOTATION: &str = "platform.dev/managed";

/// Prefix of the per-component label added to overlay resources
pub const COMPONENT_LABEL_PREFIX: &str = "app.platform.dev";

/// Standard Kubernetes label naming the application a resource belongs to
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";

/// Field manager used for writes made by the engine
pub const DEFAULT_FIELD_MANAGER: &str = "feature-engine";
