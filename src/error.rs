use thiserror::Error;

use crate::models::FeatureId;

/// Everything that can go wrong while fingerprinting or maintaining history.
///
/// None of these ever reaches the host's own document operations: the tracker logs them
/// and leaves the affected features stale until the next trigger.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Property {property} of {feature} is unreadable: {reason}")]
    PropertyUnreadable {
        feature: FeatureId,
        property: String,
        reason: String,
    },

    #[error("Dependency cycle detected between: {}", join_ids(.features))]
    CycleDetected { features: Vec<FeatureId> },

    #[error("History of {feature} holds {len} entries, capacity is {capacity}")]
    HistoryCapacityInvariantViolation {
        feature: FeatureId,
        len: usize,
        capacity: usize,
    },

    #[error("Feature not found: {0}")]
    UnknownFeature(FeatureId),

    #[error("Host error: {0}")]
    Host(#[from] anyhow::Error),

    #[error("Encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl TrackerError {
    pub fn unreadable(
        feature: &FeatureId,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::PropertyUnreadable {
            feature: feature.clone(),
            property: property.into(),
            reason: reason.into(),
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

fn join_ids(ids: &[FeatureId]) -> String {
    ids.iter()
        .map(FeatureId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
