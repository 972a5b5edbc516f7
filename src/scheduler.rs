//! Pending recomputation work and the cooperative tick loop that drains it.
//!
//! Work is never done inside a host event callback. Events only enqueue; the host (or
//! [`drive`]) calls [`DocumentTracker::tick`] repeatedly, and each tick fingerprints a
//! bounded slice of [`PendingWork`] before handing control back.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::error::{TrackerError, TrackerResult};
use crate::host::DocumentHost;
use crate::models::FeatureId;
use crate::tracker::DocumentTracker;

/// Why a feature is waiting to be fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    /// The feature itself was edited; carries the touched property names.
    DirectEdit { properties: BTreeSet<String> },
    /// Something upstream was edited.
    Dependency,
    /// Manual "analyze all" request.
    FullAnalysis,
}

impl Cause {
    pub fn direct<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::DirectEdit {
            properties: properties.into_iter().map(Into::into).collect(),
        }
    }

    /// Combines two causes for the same feature. A direct edit always wins.
    pub fn merge(self, other: Cause) -> Cause {
        match (self, other) {
            (Self::DirectEdit { mut properties }, Self::DirectEdit { properties: more }) => {
                properties.extend(more);
                Self::DirectEdit { properties }
            }
            (direct @ Self::DirectEdit { .. }, _) | (_, direct @ Self::DirectEdit { .. }) => {
                direct
            }
            (Self::Dependency, _) | (_, Self::Dependency) => Self::Dependency,
            _ => Self::FullAnalysis,
        }
    }

    /// Unchanged fingerprints are only worth a history entry after a direct edit.
    pub fn records_noop(&self) -> bool {
        matches!(self, Self::DirectEdit { .. })
    }

    pub fn summary(&self) -> String {
        match self {
            Self::DirectEdit { properties } if properties.is_empty() => "edited".to_string(),
            Self::DirectEdit { properties } => {
                properties.iter().cloned().collect::<Vec<_>>().join(", ")
            }
            Self::Dependency => "dependency changed".to_string(),
            Self::FullAnalysis => "full analysis".to_string(),
        }
    }
}

/// One queued feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    pub feature_id: FeatureId,
    pub cause: Cause,
    rank: usize,
    seq: u64,
}

impl PendingItem {
    /// Length of the longest dependency chain below this feature.
    pub fn rank(&self) -> usize {
        self.rank
    }
}

/// Features awaiting recomputation, kept in dependency order.
///
/// Each item carries a rank, one more than the highest rank among its direct
/// dependencies. Ordering by `(rank, arrival)` puts every dependency before its
/// dependents no matter when either was queued.
#[derive(Debug, Default)]
pub struct PendingWork {
    items: VecDeque<PendingItem>,
    next_seq: u64,
}

impl PendingWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `batch` into the queue, deduplicating by feature and re-ranking everything
    /// against the current dependency graph.
    ///
    /// Features that sit on or below a dependency cycle cannot be ranked; they are left
    /// out and reported as [`TrackerError::CycleDetected`]. Other host failures while
    /// ranking also drop the affected feature and are reported.
    pub fn merge<H: DocumentHost + ?Sized>(
        &mut self,
        host: &H,
        batch: impl IntoIterator<Item = (FeatureId, Cause)>,
    ) -> Vec<TrackerError> {
        for (feature_id, cause) in batch {
            if let Some(existing) = self.items.iter_mut().find(|i| i.feature_id == feature_id) {
                let merged = std::mem::replace(&mut existing.cause, Cause::FullAnalysis);
                existing.cause = merged.merge(cause);
            } else {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.items.push_back(PendingItem {
                    feature_id,
                    cause,
                    rank: 0,
                    seq,
                });
            }
        }

        let mut ranks = RankCache::default();
        let mut errors = Vec::new();
        let mut reported_cycles: BTreeSet<Vec<FeatureId>> = BTreeSet::new();
        self.items.retain_mut(|item| match ranks.rank(host, &item.feature_id) {
            Ok(rank) => {
                item.rank = rank;
                true
            }
            Err(TrackerError::CycleDetected { features }) => {
                if reported_cycles.insert(features.clone()) {
                    errors.push(TrackerError::CycleDetected { features });
                }
                false
            }
            Err(e) => {
                errors.push(e);
                false
            }
        });
        self.items
            .make_contiguous()
            .sort_by_key(|item| (item.rank, item.seq));
        errors
    }

    pub fn pop_front(&mut self) -> Option<PendingItem> {
        self.items.pop_front()
    }

    /// Removes and returns every queued item whose feature is in `ids`.
    pub fn remove_all(&mut self, ids: &BTreeSet<FeatureId>) -> Vec<PendingItem> {
        let mut removed = Vec::new();
        self.items.retain(|item| {
            if ids.contains(&item.feature_id) {
                removed.push(item.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn contains(&self, id: &FeatureId) -> bool {
        self.items.iter().any(|i| &i.feature_id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Memoized dependency ranks for one merge.
#[derive(Default)]
struct RankCache {
    ranks: HashMap<FeatureId, usize>,
}

impl RankCache {
    fn rank<H: DocumentHost + ?Sized>(&mut self, host: &H, id: &FeatureId) -> TrackerResult<usize> {
        if let Some(rank) = self.ranks.get(id) {
            return Ok(*rank);
        }

        // Iterative post-order walk over dependencies. Every frame on the stack is a node
        // whose rank is still being computed, so meeting one again means a cycle.
        let mut stack: Vec<(FeatureId, Vec<FeatureId>, usize)> =
            vec![(id.clone(), host.direct_dependencies(id)?, 0)];

        while let Some((node, deps, next)) = stack.last_mut() {
            if let Some(dep) = deps.get(*next).cloned() {
                *next += 1;
                if self.ranks.contains_key(&dep) {
                    continue;
                }
                if let Some(start) = stack.iter().position(|(n, _, _)| n == &dep) {
                    let mut features: Vec<FeatureId> =
                        stack[start..].iter().map(|(n, _, _)| n.clone()).collect();
                    features.sort();
                    return Err(TrackerError::CycleDetected { features });
                }
                let dep_deps = host.direct_dependencies(&dep)?;
                stack.push((dep, dep_deps, 0));
            } else {
                let rank = deps
                    .iter()
                    .filter_map(|d| self.ranks.get(d))
                    .map(|r| r + 1)
                    .max()
                    .unwrap_or(0);
                let node = node.clone();
                self.ranks.insert(node, rank);
                stack.pop();
            }
        }

        self.ranks
            .get(id)
            .copied()
            .ok_or_else(|| TrackerError::UnknownFeature(id.clone()))
    }
}

/// Limits of a single tick: at most `max_items` features or until `deadline`,
/// whichever comes first. The first item of a tick is always allowed so that every tick
/// makes progress.
#[derive(Debug, Clone)]
pub struct TickBudget {
    max_items: usize,
    deadline: Instant,
    processed: usize,
}

impl TickBudget {
    pub fn start(max_items: usize, budget: Duration, now: Instant) -> Self {
        Self {
            max_items: max_items.max(1),
            deadline: now + budget,
            processed: 0,
        }
    }

    pub fn allows_another(&self) -> bool {
        self.processed == 0 || (self.processed < self.max_items && Instant::now() < self.deadline)
    }

    pub fn record(&mut self) {
        self.processed += 1;
    }

    pub fn processed(&self) -> usize {
        self.processed
    }
}

/// Totals of a [`drive`] run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DriveReport {
    pub ticks: usize,
    pub settled: usize,
    pub processed: usize,
    pub changed: usize,
    pub failed: usize,
}

/// Runs ticks until nothing more can happen without a new host event.
///
/// Between ticks the task yields to the runtime; while only debounce timers are
/// running it sleeps for the configured tick interval instead of spinning. Meant for a
/// current-thread runtime, mirroring the host's single-threaded document model.
pub async fn drive<H: DocumentHost>(tracker: &mut DocumentTracker<H>) -> DriveReport {
    let mut interval = tokio::time::interval(tracker.config().tick_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut report = DriveReport::default();

    loop {
        let tick = tracker.tick(Instant::now());
        report.ticks += 1;
        report.settled += tick.settled;
        report.processed += tick.processed.len();
        report.changed += tick.changed_count();
        report.failed += tick.failed.len();

        if tracker.is_quiescent() {
            break;
        }
        if tick.remaining > 0 {
            tokio::task::yield_now().await;
        } else {
            interval.tick().await;
        }
    }

    tracing::debug!(?report, "Tracker drained");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_edit_wins_merge() {
        let merged = Cause::Dependency.merge(Cause::direct(["Length"]));
        assert_eq!(merged, Cause::direct(["Length"]));

        let merged = Cause::direct(["Length"]).merge(Cause::direct(["Offset"]));
        assert_eq!(merged.summary(), "Length, Offset");
    }

    #[test]
    fn test_dependency_outranks_full_analysis() {
        assert_eq!(Cause::FullAnalysis.merge(Cause::Dependency), Cause::Dependency);
        assert_eq!(Cause::FullAnalysis.merge(Cause::FullAnalysis), Cause::FullAnalysis);
    }

    #[test]
    fn test_only_direct_edits_record_noops() {
        assert!(Cause::direct(["Length"]).records_noop());
        assert!(!Cause::Dependency.records_noop());
        assert!(!Cause::FullAnalysis.records_noop());
    }

    #[test]
    fn test_budget_always_allows_first_item() {
        let budget = TickBudget::start(3, Duration::ZERO, Instant::now());
        assert!(budget.allows_another());
    }

    #[test]
    fn test_budget_caps_items() {
        let mut budget = TickBudget::start(2, Duration::from_secs(60), Instant::now());
        budget.record();
        assert!(budget.allows_another());
        budget.record();
        assert!(!budget.allows_another());
        assert_eq!(budget.processed(), 2);
    }
}
