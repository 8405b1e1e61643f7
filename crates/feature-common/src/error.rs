//! Error types for the feature engine
//!
//! Errors are structured with fields to aid debugging in production.
//! Stage failures are wrapped in [`Error::Stage`] so the tracker status can
//! name the pipeline step that failed.

use std::fmt;

use kube::core::ErrorResponse;
use thiserror::Error;

use crate::crd::ConditionReason;
use crate::template::TemplateError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for feature engine operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid feature definition, detected before anything reaches the cluster
    #[error("validation error for {feature}: {message}")]
    Validation {
        /// Name of the feature with invalid configuration
        feature: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "target_namespace")
        field: Option<String>,
    },

    /// Manifest could not be read, parsed or checked
    #[error("manifest error [{path}]: {message}")]
    Manifest {
        /// Path of the manifest source
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Template rendering failed
    #[error("template error [{path}]: {source}")]
    Template {
        /// Path of the template
        path: String,
        /// The underlying template error
        source: TemplateError,
    },

    /// Overlay build failed
    #[error("overlay error [{path}]: {message}")]
    Overlay {
        /// Overlay directory
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Data bag lookup failed
    #[error("data error [{key}]: {message}")]
    Data {
        /// Key that was looked up
        key: String,
        /// Description of what failed
        message: String,
    },

    /// A feature action (condition, resource action, cleanup) failed
    #[error("{message}")]
    Action {
        /// Description of what failed
        message: String,
    },

    /// Failure of one pipeline stage, tagged with the stage reason
    #[error("{reason}: {source}")]
    Stage {
        /// Pipeline stage that failed
        reason: ConditionReason,
        /// The underlying failure
        source: Box<Error>,
    },

    /// Failure of one feature run by a handler
    #[error("feature {name}: {source}")]
    Feature {
        /// Name of the failing feature
        name: String,
        /// The underlying failure
        source: Box<Error>,
    },

    /// Several independent failures
    #[error("{0}")]
    Multiple(ErrorList),

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "overlay")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            feature: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with feature context
    pub fn validation_for(feature: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            feature: feature.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with feature context and field name
    pub fn validation_for_field(
        feature: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            feature: feature.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a manifest error for the given path
    pub fn manifest(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an overlay error for the given directory
    pub fn overlay(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Overlay {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a data bag error for the given key
    pub fn data(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Data {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create an action error with the given message
    pub fn action(msg: impl Into<String>) -> Self {
        Self::Action {
            message: msg.into(),
        }
    }

    /// Tag an error with the pipeline stage it came from
    pub fn stage(reason: ConditionReason, source: Error) -> Self {
        Self::Stage {
            reason,
            source: Box::new(source),
        }
    }

    /// Attribute an error to the named feature
    pub fn for_feature(name: impl Into<String>, source: Error) -> Self {
        Self::Feature {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Stage reason carried by this error, if it was tagged with one
    pub fn condition_reason(&self) -> Option<ConditionReason> {
        match self {
            Self::Stage { reason, .. } => Some(*reason),
            Self::Feature { source, .. } => source.condition_reason(),
            Self::Multiple(list) => list.iter().find_map(Error::condition_reason),
            _ => None,
        }
    }

    /// The Kubernetes API status behind this error, looking through stage tags
    pub fn api_error(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Kube {
                source: kube::Error::Api(response),
            } => Some(response),
            Self::Stage { source, .. } | Self::Feature { source, .. } => source.api_error(),
            _ => None,
        }
    }

    /// Returns true for a 404 response from the API server
    pub fn is_not_found(&self) -> bool {
        self.api_error().is_some_and(|e| e.code == 404)
    }

    /// Returns true for a 409 response caused by an existing object
    pub fn is_already_exists(&self) -> bool {
        self.api_error()
            .is_some_and(|e| e.code == 409 && e.reason == "AlreadyExists")
    }

    /// Returns true for a 409 optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        self.api_error()
            .is_some_and(|e| e.code == 409 && e.reason != "AlreadyExists")
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Ordered collection of errors from a best-effort sequence of steps
///
/// Nested lists are flattened on insert so the rendered message stays flat.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<Error>);

impl ErrorList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error, flattening nested lists
    pub fn push(&mut self, err: Error) {
        match err {
            Error::Multiple(list) => self.0.extend(list.0),
            other => self.0.push(other),
        }
    }

    /// Record the error of a result, returning the success value if any
    pub fn push_result<T>(&mut self, result: crate::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// Number of collected errors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no error was collected
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the collected errors in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    /// Collapse into a result: no errors is `Ok`, a single error is returned
    /// as-is, several become [`Error::Multiple`]
    pub fn into_result(mut self) -> crate::Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(Error::Multiple(self)),
        }
    }
}

impl Extend<Error> for ErrorList {
    fn extend<I: IntoIterator<Item = Error>>(&mut self, iter: I) {
        for err in iter {
            self.push(err);
        }
    }
}

impl FromIterator<Error> for ErrorList {
    fn from_iter<I: IntoIterator<Item = Error>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl IntoIterator for ErrorList {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "no errors"),
            [single] => write!(f, "{}", single),
            errors => {
                write!(f, "{} errors occurred:", errors.len())?;
                for err in errors {
                    write!(f, "\n\t* {}", err)?;
                }
                Ok(())
            }
        }
    }
}
