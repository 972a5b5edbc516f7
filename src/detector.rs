//! Edit-session detection.
//!
//! Raw property notifications arrive in bursts while a user works in a sketch or a task
//! panel. The detector folds each burst into one [`SessionState`] and releases a single
//! [`SettleEvent`] once the edit is over:
//!
//! - when the host closes the editor of the feature,
//! - when the last open editor in the document closes (for features changed as a side
//!   effect of editing another one),
//! - or, for changes made with no editor open at all, after a quiet period.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::models::{FeatureId, SessionPhase, SessionState, SettleEvent};

#[derive(Debug)]
pub struct EditSessionDetector {
    enabled: bool,
    settle_delay: Duration,
    sessions: BTreeMap<FeatureId, SessionState>,
    open_edits: BTreeSet<FeatureId>,
}

impl EditSessionDetector {
    pub fn new(settle_delay: Duration, enabled: bool) -> Self {
        Self {
            enabled,
            settle_delay,
            sessions: BTreeMap::new(),
            open_edits: BTreeSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Switching off drops every open session; nothing buffered so far will settle.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            let dropped = self.sessions.len();
            self.sessions.clear();
            if dropped > 0 {
                tracing::debug!(dropped, "Tracking disabled, open sessions discarded");
            }
        }
    }

    /// Records a raw change on `id`. Returns `false` when tracking is off.
    ///
    /// A change on a feature whose settle event has not been consumed yet reopens the
    /// session instead of starting a new one.
    pub fn on_change(&mut self, id: &FeatureId, descriptor: &str, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }
        let session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| SessionState::new(id.clone(), now));
        if session.phase == SessionPhase::Settling {
            tracing::debug!(feature = %id, "Edit resumed before settle was processed");
            session.phase = SessionPhase::Editing;
        }
        session.record(descriptor, now);
        tracing::debug!(feature = %id, descriptor, "Change buffered");
        true
    }

    pub fn on_edit_opened(&mut self, id: &FeatureId) {
        self.open_edits.insert(id.clone());
        if let Some(session) = self.sessions.get_mut(id) {
            if session.phase == SessionPhase::Settling {
                tracing::debug!(feature = %id, "Editor reopened, pending settle discarded");
                session.phase = SessionPhase::Editing;
            }
        }
    }

    pub fn on_edit_closed(&mut self, id: &FeatureId) {
        self.open_edits.remove(id);
        if let Some(session) = self.sessions.get_mut(id) {
            session.phase = SessionPhase::Settling;
        }
        if self.open_edits.is_empty() {
            for session in self.sessions.values_mut() {
                session.phase = SessionPhase::Settling;
            }
        }
    }

    /// Releases one settle event per concluded session and forgets those sessions.
    pub fn take_settled(&mut self, now: Instant) -> Vec<SettleEvent> {
        if !self.enabled {
            return Vec::new();
        }

        if self.open_edits.is_empty() {
            for session in self.sessions.values_mut() {
                if session.phase == SessionPhase::Editing
                    && now.saturating_duration_since(session.last_change_at) >= self.settle_delay
                {
                    session.phase = SessionPhase::Settling;
                }
            }
        }

        let settled: Vec<FeatureId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.phase == SessionPhase::Settling)
            .map(|(id, _)| id.clone())
            .collect();

        settled
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .map(|session| SettleEvent {
                feature_id: session.feature_id,
                properties: session.buffered.into_iter().collect(),
            })
            .collect()
    }

    /// True while `id` has an editor open or unsettled changes.
    pub fn is_editing(&self, id: &FeatureId) -> bool {
        self.open_edits.contains(id)
            || self
                .sessions
                .get(id)
                .is_some_and(|s| s.phase == SessionPhase::Editing)
    }

    pub fn session(&self, id: &FeatureId) -> Option<&SessionState> {
        self.sessions.get(id)
    }

    pub fn open_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_open_editors(&self) -> bool {
        !self.open_edits.is_empty()
    }

    /// True when some session will settle without any further host event, either
    /// because it already is settling or because its quiet period is still running.
    pub fn settles_on_its_own(&self) -> bool {
        self.sessions.values().any(|s| s.phase == SessionPhase::Settling)
            || (self.open_edits.is_empty() && !self.sessions.is_empty())
    }

    /// Forgets all sessions and editors, e.g. when the document closes.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.open_edits.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(300);

    fn id(name: &str) -> FeatureId {
        FeatureId::new(name)
    }

    #[test]
    fn test_many_changes_in_one_edit_settle_once() {
        let mut detector = EditSessionDetector::new(DELAY, true);
        let t0 = Instant::now();
        let sketch = id("Sketch");

        detector.on_edit_opened(&sketch);
        for n in 0..5 {
            detector.on_change(&sketch, "Constraints", t0 + Duration::from_millis(n));
        }
        detector.on_change(&sketch, "Geometry", t0);
        assert!(detector.take_settled(t0 + DELAY * 10).is_empty());

        detector.on_edit_closed(&sketch);
        let events = detector.take_settled(t0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].properties, vec!["Constraints", "Geometry"]);
        assert!(detector.take_settled(t0).is_empty());
    }

    #[test]
    fn test_reopen_before_consumption_discards_settle() {
        let mut detector = EditSessionDetector::new(DELAY, true);
        let t0 = Instant::now();
        let sketch = id("Sketch");

        detector.on_edit_opened(&sketch);
        detector.on_change(&sketch, "Geometry", t0);
        detector.on_edit_closed(&sketch);
        detector.on_edit_opened(&sketch);
        detector.on_change(&sketch, "Constraints", t0);

        assert!(detector.take_settled(t0).is_empty());
        assert!(detector.is_editing(&sketch));

        detector.on_edit_closed(&sketch);
        let events = detector.take_settled(t0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].properties, vec!["Constraints", "Geometry"]);
    }

    #[test]
    fn test_change_without_editor_settles_after_quiet_period() {
        let mut detector = EditSessionDetector::new(DELAY, true);
        let t0 = Instant::now();
        let pad = id("Pad");

        detector.on_change(&pad, "Length", t0);
        assert!(detector.take_settled(t0 + Duration::from_millis(100)).is_empty());

        detector.on_change(&pad, "Length", t0 + Duration::from_millis(200));
        assert!(detector.take_settled(t0 + Duration::from_millis(400)).is_empty());

        let events = detector.take_settled(t0 + Duration::from_millis(500));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].feature_id, pad);
    }

    #[test]
    fn test_side_effect_changes_wait_for_last_editor() {
        let mut detector = EditSessionDetector::new(DELAY, true);
        let t0 = Instant::now();
        let (pad, sketch) = (id("Pad"), id("Sketch"));

        detector.on_edit_opened(&pad);
        detector.on_change(&sketch, "Placement", t0);
        assert!(detector.take_settled(t0 + DELAY * 10).is_empty());

        detector.on_edit_closed(&pad);
        let events = detector.take_settled(t0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].feature_id, sketch);
    }

    #[test]
    fn test_disabled_detector_ignores_changes() {
        let mut detector = EditSessionDetector::new(DELAY, false);
        let t0 = Instant::now();
        let sketch = id("Sketch");

        assert!(!detector.on_change(&sketch, "Geometry", t0));
        assert!(detector.session(&sketch).is_none());
    }

    #[test]
    fn test_disabling_drops_open_sessions() {
        let mut detector = EditSessionDetector::new(DELAY, true);
        let t0 = Instant::now();
        let sketch = id("Sketch");

        detector.on_edit_opened(&sketch);
        detector.on_change(&sketch, "Geometry", t0);
        detector.set_enabled(false);
        detector.on_edit_closed(&sketch);

        assert!(detector.take_settled(t0 + DELAY).is_empty());
        assert_eq!(detector.open_session_count(), 0);
    }

    #[test]
    fn test_closing_editor_without_changes_emits_nothing() {
        let mut detector = EditSessionDetector::new(DELAY, true);
        let sketch = id("Sketch");

        detector.on_edit_opened(&sketch);
        detector.on_edit_closed(&sketch);
        assert!(detector.take_settled(Instant::now()).is_empty());
    }
}
