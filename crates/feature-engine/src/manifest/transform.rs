//! Enrichment applied to overlay output before it is applied

use std::collections::BTreeMap;

use kube::api::DynamicObject;

use feature_common::kube_utils::is_cluster_scoped_kind;
use feature_common::{COMPONENT_LABEL_PREFIX, PART_OF_LABEL};

/// Mutation applied to every resource an overlay produces
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceTransform {
    /// Place namespaced resources in the given namespace
    SetNamespace(String),
    /// Merge labels into every resource
    AddLabels(BTreeMap<String, String>),
}

impl ResourceTransform {
    /// Labels identifying resources of a platform component
    pub fn component_labels(component: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            format!("{}/{}", COMPONENT_LABEL_PREFIX, component),
            "true".to_string(),
        );
        labels.insert(PART_OF_LABEL.to_string(), component.to_string());
        Self::AddLabels(labels)
    }

    /// Apply the transform to one resource
    pub fn apply(&self, obj: &mut DynamicObject) {
        match self {
            Self::SetNamespace(namespace) => {
                let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
                if !is_cluster_scoped_kind(kind) {
                    obj.metadata.namespace = Some(namespace.clone());
                }
            }
            Self::AddLabels(labels) => {
                let existing = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
                for (key, value) in labels {
                    existing.insert(key.clone(), value.clone());
                }
            }
        }
    }
}
