//! Custom Resource Definitions for the feature engine

mod feature_tracker;
mod types;

pub use feature_tracker::{
    ConditionReason, FeatureTracker, FeatureTrackerSpec, FeatureTrackerStatus, Source,
    SourceType, TrackerPhase, REASON_FAILED,
};
pub use types::{
    find_condition, set_condition, Condition, ConditionStatus, CONDITION_AVAILABLE,
    CONDITION_DEGRADED, CONDITION_PROGRESSING,
};
