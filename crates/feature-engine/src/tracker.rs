//! FeatureTracker lifecycle and status reporting

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::{debug, info, warn};

use feature_common::crd::{
    set_condition, Condition, ConditionReason, ConditionStatus, FeatureTracker,
    FeatureTrackerSpec, FeatureTrackerStatus, TrackerPhase, CONDITION_AVAILABLE,
    CONDITION_DEGRADED, CONDITION_PROGRESSING, REASON_FAILED,
};
use feature_common::retry::{retry_with_backoff_if, RetryConfig};
use feature_common::{Error, Result};

use crate::client::ClusterClient;

/// Fetch the tracker, creating it on first apply.
///
/// The owner reference points at the entity that caused the feature to
/// exist, so removing that entity also removes the tracker.
pub async fn ensure_tracker(
    client: &dyn ClusterClient,
    name: &str,
    spec: FeatureTrackerSpec,
    owner: Option<&OwnerReference>,
) -> Result<FeatureTracker> {
    if let Some(existing) = client.get_tracker(name).await? {
        debug!(tracker = %name, "Feature tracker exists");
        return Ok(existing);
    }

    let mut tracker = FeatureTracker::new(name, spec);
    if let Some(owner) = owner {
        tracker.metadata.owner_references = Some(vec![owner.clone()]);
    }

    match client.create_tracker(&tracker).await {
        Ok(created) => {
            info!(tracker = %name, "Created feature tracker");
            Ok(created)
        }
        Err(e) if e.is_already_exists() => client.get_tracker(name).await?.ok_or_else(|| {
            Error::internal_with_context(
                "ensure_tracker",
                format!("tracker {} vanished after create conflict", name),
            )
        }),
        Err(e) => Err(e),
    }
}

/// Delete the tracker; a missing tracker is not an error
pub async fn delete_tracker(client: &dyn ClusterClient, name: &str) -> Result<()> {
    client.delete_tracker(name).await?;
    info!(tracker = %name, "Deleted feature tracker");
    Ok(())
}

/// Record that the pipeline started
pub fn mark_progressing(status: &mut FeatureTrackerStatus, message: &str) {
    set_condition(
        &mut status.conditions,
        Condition::new(
            CONDITION_PROGRESSING,
            ConditionStatus::True,
            ConditionReason::FeatureCreated.as_str(),
            message,
        ),
    );
    status.phase = TrackerPhase::Progressing;
}

/// Record the outcome of the pipeline
///
/// Success sets Available; a failure sets Degraded with the reason of the
/// stage that failed, or `Failed` when the error carries no stage.
pub fn mark_outcome(status: &mut FeatureTrackerStatus, outcome: Option<&Error>) {
    let (available, degraded, phase) = match outcome {
        None => (
            Condition::new(
                CONDITION_AVAILABLE,
                ConditionStatus::True,
                ConditionReason::FeatureCreated.as_str(),
                "Feature applied successfully",
            ),
            Condition::new(CONDITION_DEGRADED, ConditionStatus::False, "", ""),
            TrackerPhase::Available,
        ),
        Some(err) => {
            let reason = err
                .condition_reason()
                .map(|r| r.as_str())
                .unwrap_or(REASON_FAILED);
            (
                Condition::new(CONDITION_AVAILABLE, ConditionStatus::False, reason, ""),
                Condition::new(
                    CONDITION_DEGRADED,
                    ConditionStatus::True,
                    reason,
                    failure_message(err),
                ),
                TrackerPhase::Degraded,
            )
        }
    };

    set_condition(&mut status.conditions, available);
    set_condition(&mut status.conditions, degraded);
    set_condition(
        &mut status.conditions,
        Condition::new(
            CONDITION_PROGRESSING,
            ConditionStatus::False,
            ConditionReason::FeatureCreated.as_str(),
            "",
        ),
    );
    status.phase = phase;
}

fn failure_message(err: &Error) -> String {
    match err {
        Error::Stage { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}

/// Writes tracker status with fetch-mutate-write, retrying on conflicts
pub struct StatusReporter<'a> {
    client: &'a dyn ClusterClient,
    tracker_name: &'a str,
    retry: &'a RetryConfig,
}

impl<'a> StatusReporter<'a> {
    /// Reporter for the named tracker
    pub fn new(client: &'a dyn ClusterClient, tracker_name: &'a str, retry: &'a RetryConfig) -> Self {
        Self {
            client,
            tracker_name,
            retry,
        }
    }

    /// Mark the feature as being applied
    pub async fn progressing(&self, message: &str) -> Result<()> {
        self.update(|status| mark_progressing(status, message)).await
    }

    /// Report the pipeline outcome
    pub async fn report(&self, outcome: Option<&Error>) -> Result<()> {
        if let Some(err) = outcome {
            warn!(tracker = %self.tracker_name, error = %err, "Reporting degraded feature");
        }
        self.update(|status| mark_outcome(status, outcome)).await
    }

    async fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: Fn(&mut FeatureTrackerStatus) + Sync,
    {
        let client = self.client;
        let name = self.tracker_name;
        let mutate = &mutate;

        retry_with_backoff_if(
            self.retry,
            "update_tracker_status",
            Error::is_conflict,
            move || async move {
                let mut tracker = client.get_tracker(name).await?.ok_or_else(|| {
                    Error::internal_with_context(
                        "update_tracker_status",
                        format!("tracker {} not found", name),
                    )
                })?;
                mutate(tracker.status.get_or_insert_with(Default::default));
                client.replace_tracker_status(&tracker).await.map(|_| ())
            },
        )
        .await
    }
}
