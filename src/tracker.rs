//! The document-scoped tracker.
//!
//! One [`DocumentTracker`] is created per open document and dropped with it. It owns the
//! detector, the coordinator and the pending queue, and it is the only object the host
//! talks to: host callbacks call the `on_*` methods, which only enqueue, and the host's
//! idle loop calls [`DocumentTracker::tick`].

use std::collections::BTreeSet;
use std::time::Instant;

use crate::config::TrackerConfig;
use crate::coordinator::{transitive_dependents, ChangeCoordinator, DrainOutcome};
use crate::detector::EditSessionDetector;
use crate::host::{Console, DocumentHost, TracingConsole};
use crate::models::{FeatureId, SessionState, CREATED_DESCRIPTOR};
use crate::scheduler::{PendingItem, PendingWork, TickBudget};

/// A full analysis that has not drained yet.
#[derive(Debug, Clone, Copy)]
struct AnalysisProgress {
    started: Instant,
    processed: usize,
}

/// What one tick did.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    /// Settle events consumed at the start of the tick.
    pub settled: usize,
    /// Features fingerprinted, in processing order.
    pub processed: Vec<(FeatureId, DrainOutcome)>,
    /// Features whose fingerprinting failed and that were deferred.
    pub failed: Vec<FeatureId>,
    /// Items still queued after the tick.
    pub remaining: usize,
}

impl TickReport {
    pub fn changed_count(&self) -> usize {
        self.processed.iter().filter(|(_, o)| o.is_changed()).count()
    }
}

pub struct DocumentTracker<H: DocumentHost> {
    host: H,
    config: TrackerConfig,
    console: Box<dyn Console>,
    detector: EditSessionDetector,
    coordinator: ChangeCoordinator,
    pending: PendingWork,
    analysis: Option<AnalysisProgress>,
}

impl<H: DocumentHost> DocumentTracker<H> {
    /// Attaches a tracker to `host`, picking up the document's persisted tracking flag.
    pub fn new(host: H, config: TrackerConfig) -> Self {
        let config = config.normalized();
        let enabled = match host.tracking_enabled() {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::warn!("Could not read tracking flag, assuming enabled: {:#}", e);
                true
            }
        };
        let detector = EditSessionDetector::new(config.settle_delay(), enabled);
        let coordinator = ChangeCoordinator::new(config.catalog(), config.history_length);
        Self {
            host,
            config,
            console: Box::new(TracingConsole),
            detector,
            coordinator,
            pending: PendingWork::new(),
            analysis: None,
        }
    }

    pub fn with_console(mut self, console: impl Console + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_tracking(&self) -> bool {
        self.detector.is_enabled()
    }

    pub fn session(&self, id: &FeatureId) -> Option<&SessionState> {
        self.detector.session(id)
    }

    pub fn pending(&self) -> &PendingWork {
        &self.pending
    }

    pub fn deferred(&self) -> Vec<FeatureId> {
        self.coordinator.deferred().cloned().collect()
    }

    // ============================================================
    // Host events
    // ============================================================

    pub fn on_property_changed(&mut self, id: &FeatureId, property: &str) {
        self.on_property_changed_at(id, property, Instant::now());
    }

    pub fn on_property_changed_at(&mut self, id: &FeatureId, property: &str, now: Instant) {
        if self.config.is_ignored(property) {
            return;
        }
        self.detector.on_change(id, property, now);
    }

    pub fn on_created(&mut self, id: &FeatureId) {
        self.on_created_at(id, Instant::now());
    }

    pub fn on_created_at(&mut self, id: &FeatureId, now: Instant) {
        self.detector.on_change(id, CREATED_DESCRIPTOR, now);
    }

    pub fn on_edit_opened(&mut self, id: &FeatureId) {
        self.detector.on_edit_opened(id);
        if self.detector.is_enabled() {
            tracing::debug!(feature = %id, "Editor opened, changes are buffered");
        }
    }

    pub fn on_edit_closed(&mut self, id: &FeatureId) {
        self.detector.on_edit_closed(id);
        if self.detector.is_enabled() && !self.detector.has_open_editors() {
            self.coordinator
                .requeue_deferred(&self.host, &mut self.pending, self.console.as_ref());
        }
    }

    // ============================================================
    // User commands
    // ============================================================

    /// Switches tracking on or off and persists the flag on the document.
    ///
    /// Switching off discards open sessions, queued and deferred work at once.
    pub fn set_tracking(&mut self, enabled: bool) {
        if let Err(e) = self.host.set_tracking_enabled(enabled) {
            self.console
                .error(&format!("Could not persist tracking flag: {:#}", e));
        }
        self.detector.set_enabled(enabled);
        if enabled {
            self.console.message("Tracking enabled");
        } else {
            self.pending.clear();
            self.coordinator.clear_deferred();
            self.analysis = None;
            self.console.message("Tracking disabled");
        }
    }

    /// Queues every feature of the document. Processing happens in later ticks, exactly
    /// like work triggered by edits; the tick that empties the queue reports completion.
    pub fn run_full_analysis(&mut self) -> usize {
        match self
            .coordinator
            .enqueue_all(&self.host, &mut self.pending, self.console.as_ref())
        {
            Ok(count) => {
                self.analysis.get_or_insert(AnalysisProgress {
                    started: Instant::now(),
                    processed: 0,
                });
                count
            }
            Err(e) => {
                self.console
                    .error(&format!("Full analysis could not list features: {}", e));
                0
            }
        }
    }

    // ============================================================
    // Scheduling
    // ============================================================

    /// Runs one bounded slice of work.
    ///
    /// Consumes settled sessions, then fingerprints queued features in dependency order
    /// until the per-tick item limit or time budget is reached.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        for event in self.detector.take_settled(now) {
            report.settled += 1;
            self.coordinator
                .on_settle(&self.host, &mut self.pending, event, self.console.as_ref());
        }

        let mut budget = TickBudget::start(self.config.batch_size, self.config.tick_budget(), now);
        while budget.allows_another() {
            let Some(item) = self.pending.pop_front() else {
                break;
            };

            if self.detector.is_editing(&item.feature_id) {
                tracing::debug!(feature = %item.feature_id, "Feature is being edited, deferred");
                self.defer_with_dependents(item);
                continue;
            }

            budget.record();
            if let Some(analysis) = self.analysis.as_mut() {
                analysis.processed += 1;
            }
            match self
                .coordinator
                .drain_one(&self.host, &item, self.console.as_ref())
            {
                Ok(outcome) => report.processed.push((item.feature_id, outcome)),
                Err(e) if !self.still_exists(&item.feature_id) => {
                    self.console.warning(&format!(
                        "Dropping {}: no longer in the document",
                        item.feature_id
                    ));
                    tracing::debug!(feature = %item.feature_id, error = %e, "Queued feature was removed");
                }
                Err(e) => {
                    self.console
                        .error(&format!("Skipping {}: {}", item.feature_id, e));
                    tracing::warn!(feature = %item.feature_id, error = %e, "Fingerprinting failed");
                    report.failed.push(item.feature_id.clone());
                    self.defer_with_dependents(item);
                }
            }
        }

        report.remaining = self.pending.len();
        if report.remaining > 0 {
            tracing::debug!(remaining = report.remaining, "Tick budget exhausted, yielding");
        } else if !self.holds_work_for_editor() {
            if let Some(analysis) = self.analysis.take() {
                self.console.message(&format!(
                    "Full analysis done: {} features processed in {:.2}s",
                    analysis.processed,
                    analysis.started.elapsed().as_secs_f64()
                ));
            }
        }
        report
    }

    /// Deferred work that will be re-queued as soon as the last editor closes.
    fn holds_work_for_editor(&self) -> bool {
        self.detector.has_open_editors() && self.coordinator.deferred().next().is_some()
    }

    fn still_exists(&self, id: &FeatureId) -> bool {
        self.host
            .feature_ids()
            .map_or(true, |ids| ids.contains(id))
    }

    /// Parks `item` together with every queued feature downstream of it, so no dependent
    /// is fingerprinted against a hash that is about to change.
    fn defer_with_dependents(&mut self, item: PendingItem) {
        let downstream: BTreeSet<FeatureId> =
            match transitive_dependents(&self.host, &item.feature_id) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    tracing::warn!(feature = %item.feature_id, error = %e, "Dependent walk failed");
                    BTreeSet::new()
                }
            };
        let skipped = self.pending.remove_all(&downstream);
        if !skipped.is_empty() {
            tracing::debug!(
                feature = %item.feature_id,
                skipped = skipped.len(),
                "Dependents held back with their dependency"
            );
        }
        self.coordinator.defer(std::iter::once(item).chain(skipped));
    }

    /// True when nothing can progress without a new host event: the queue is empty and
    /// no session is waiting to settle by itself.
    pub fn is_quiescent(&self) -> bool {
        self.pending.is_empty() && !self.detector.settles_on_its_own()
    }

    /// Tears the tracker down with its document. Nothing buffered is processed.
    pub fn close(mut self) -> H {
        self.detector.clear();
        self.pending.clear();
        self.coordinator.clear_deferred();
        self.analysis = None;
        self.host
    }
}
