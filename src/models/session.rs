use std::collections::BTreeSet;
use std::time::Instant;

use super::feature::FeatureId;

/// Descriptor buffered when a feature is created rather than edited.
pub const CREATED_DESCRIPTOR: &str = "created";

/// An open edit session on one feature.
///
/// Sessions are **transient**: they live in memory from the first raw change until the
/// coordinator consumes the settle event, or until tracking is switched off or the
/// document closes. Nothing about a session is persisted.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub feature_id: FeatureId,
    /// Property names touched during the session (or [`CREATED_DESCRIPTOR`]).
    pub buffered: BTreeSet<String>,
    pub started_at: Instant,
    pub last_change_at: Instant,
    pub phase: SessionPhase,
}

impl SessionState {
    pub fn new(feature_id: FeatureId, now: Instant) -> Self {
        Self {
            feature_id,
            buffered: BTreeSet::new(),
            started_at: now,
            last_change_at: now,
            phase: SessionPhase::Editing,
        }
    }

    pub fn record(&mut self, descriptor: &str, now: Instant) {
        self.buffered.insert(descriptor.to_string());
        self.last_change_at = now;
    }
}

/// Where an open session stands. A feature without a session is idle.
///
/// - `Editing`: changes are being buffered, nothing is fingerprinted
/// - `Settling`: the edit concluded; one settle event is waiting for the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Editing,
    Settling,
}

/// Signal that an edit session on `feature_id` has genuinely concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleEvent {
    pub feature_id: FeatureId,
    /// Everything buffered during the session, sorted.
    pub properties: Vec<String>,
}

impl SettleEvent {
    /// Short description used as the history summary.
    pub fn summary(&self) -> String {
        if self.properties.is_empty() {
            "edited".to_string()
        } else {
            self.properties.join(", ")
        }
    }
}
