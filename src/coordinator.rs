//! Turns settle events into ordered fingerprint work and applies the results.
//!
//! The coordinator is the only writer of [`FEATURE_HASH`] and [`FEATURE_HISTORY`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::Utc;

use crate::error::{TrackerError, TrackerResult};
use crate::fingerprint::{fingerprint_feature, stored_hash};
use crate::host::{Console, DocumentHost};
use crate::models::{
    FeatureCatalog, FeatureHash, FeatureId, HistoryEntry, HistoryLedger, PropertyKind,
    PropertyValue, SettleEvent, FEATURE_HASH, FEATURE_HISTORY, META_GROUP,
};
use crate::scheduler::{Cause, PendingItem, PendingWork};

/// Result of fingerprinting one queued feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A new fingerprint was written and a history entry appended.
    Changed {
        old: Option<FeatureHash>,
        new: FeatureHash,
    },
    /// The fingerprint did not change. `recorded` tells whether a no-op history entry
    /// was still appended (direct edits only).
    Unchanged { hash: FeatureHash, recorded: bool },
}

impl DrainOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

#[derive(Debug)]
pub struct ChangeCoordinator {
    catalog: FeatureCatalog,
    history_length: usize,
    /// Work skipped in an earlier batch, re-queued on the next trigger.
    deferred: BTreeMap<FeatureId, Cause>,
}

impl ChangeCoordinator {
    pub fn new(catalog: FeatureCatalog, history_length: usize) -> Self {
        Self {
            catalog,
            history_length,
            deferred: BTreeMap::new(),
        }
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    /// Queues the settled feature and everything downstream of it.
    ///
    /// Returns the number of features that entered or were refreshed in the queue.
    pub fn on_settle<H: DocumentHost + ?Sized>(
        &mut self,
        host: &H,
        pending: &mut PendingWork,
        event: SettleEvent,
        console: &dyn Console,
    ) -> usize {
        console.message(&format!("Changed {}: {}", event.feature_id, event.summary()));

        let dependents = match transitive_dependents(host, &event.feature_id) {
            Ok(dependents) => dependents,
            Err(e) => {
                console.error(&format!(
                    "Could not walk dependents of {}: {}",
                    event.feature_id, e
                ));
                tracing::warn!(feature = %event.feature_id, error = %e, "Dependent walk failed");
                Vec::new()
            }
        };

        let mut batch = Vec::with_capacity(dependents.len() + 1);
        batch.push((
            event.feature_id.clone(),
            Cause::direct(event.properties.iter().cloned()),
        ));
        batch.extend(dependents.into_iter().map(|id| (id, Cause::Dependency)));
        let count = batch.len();

        self.merge_with_deferred(host, pending, batch, console);
        count
    }

    /// Queues every feature of the document.
    pub fn enqueue_all<H: DocumentHost + ?Sized>(
        &mut self,
        host: &H,
        pending: &mut PendingWork,
        console: &dyn Console,
    ) -> TrackerResult<usize> {
        let ids = host.feature_ids()?;
        let count = ids.len();
        console.message(&format!("Starting full analysis of {} features", count));
        self.merge_with_deferred(
            host,
            pending,
            ids.into_iter().map(|id| (id, Cause::FullAnalysis)).collect(),
            console,
        );
        Ok(count)
    }

    /// Re-queues deferred work without a new trigger of its own.
    pub fn requeue_deferred<H: DocumentHost + ?Sized>(
        &mut self,
        host: &H,
        pending: &mut PendingWork,
        console: &dyn Console,
    ) {
        if !self.deferred.is_empty() {
            self.merge_with_deferred(host, pending, Vec::new(), console);
        }
    }

    fn merge_with_deferred<H: DocumentHost + ?Sized>(
        &mut self,
        host: &H,
        pending: &mut PendingWork,
        mut batch: Vec<(FeatureId, Cause)>,
        console: &dyn Console,
    ) {
        let deferred = std::mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            match host.feature_ids() {
                Ok(ids) => {
                    let live: BTreeSet<FeatureId> = ids.into_iter().collect();
                    for (id, cause) in deferred {
                        if live.contains(&id) {
                            batch.push((id, cause));
                        } else {
                            tracing::debug!(feature = %id, "Deferred feature was removed, dropped");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not list features, re-queueing all deferred work");
                    batch.extend(deferred);
                }
            }
        }
        for error in pending.merge(host, batch) {
            console.warning(&format!("Excluded from this batch: {}", error));
            tracing::warn!(error = %error, "Feature excluded from batch");
        }
    }

    /// Parks work until the next trigger.
    pub fn defer(&mut self, items: impl IntoIterator<Item = PendingItem>) {
        for item in items {
            let cause = match self.deferred.remove(&item.feature_id) {
                Some(existing) => existing.merge(item.cause),
                None => item.cause,
            };
            self.deferred.insert(item.feature_id, cause);
        }
    }

    pub fn deferred(&self) -> impl Iterator<Item = &FeatureId> {
        self.deferred.keys()
    }

    pub fn clear_deferred(&mut self) {
        self.deferred.clear();
    }

    /// Fingerprints one queued feature and records the result.
    ///
    /// Hash and history are written together, and only after the new fingerprint is
    /// fully computed; an error leaves both properties untouched.
    pub fn drain_one<H: DocumentHost + ?Sized>(
        &self,
        host: &H,
        item: &PendingItem,
        console: &dyn Console,
    ) -> TrackerResult<DrainOutcome> {
        let id = &item.feature_id;
        let new = fingerprint_feature(host, &self.catalog, id)?;
        let old = stored_hash(host, id)?;
        let (mut ledger, trimmed) = self.load_history(host, id)?;
        if trimmed > 0 {
            let violation = TrackerError::HistoryCapacityInvariantViolation {
                feature: id.clone(),
                len: ledger.len() + trimmed,
                capacity: ledger.capacity(),
            };
            console.warning(&format!("{} (trimmed)", violation));
            tracing::warn!(feature = %id, trimmed, "History exceeded capacity");
        }

        if old.as_ref() != Some(&new) {
            let summary = item.cause.summary();
            ledger.push(HistoryEntry {
                timestamp: Utc::now(),
                hash: new.clone(),
                previous_hash: old.clone(),
                summary: summary.clone(),
            });
            self.ensure_properties(host, id)?;
            host.write_properties(
                id,
                &[
                    (FEATURE_HASH, PropertyValue::Text(new.to_string())),
                    (FEATURE_HISTORY, ledger.to_property()?),
                ],
            )?;

            console.message(&format!(
                "{}: {} -> {} ({})",
                id,
                old.as_ref().map_or("-", FeatureHash::short),
                new.short(),
                summary
            ));
            tracing::info!(feature = %id, old = ?old.as_ref().map(FeatureHash::as_str), new = %new, %summary, "Fingerprint changed");
            return Ok(DrainOutcome::Changed { old, new });
        }

        let recorded = item.cause.records_noop();
        if recorded {
            ledger.push(HistoryEntry {
                timestamp: Utc::now(),
                hash: new.clone(),
                previous_hash: Some(new.clone()),
                summary: format!("no change: {}", item.cause.summary()),
            });
        }
        if recorded || trimmed > 0 {
            self.ensure_properties(host, id)?;
            host.write_property(id, FEATURE_HISTORY, &ledger.to_property()?)?;
        }
        tracing::debug!(feature = %id, recorded, "Fingerprint unchanged");
        Ok(DrainOutcome::Unchanged {
            hash: new,
            recorded,
        })
    }

    /// Reads the stored history of `id`, trimmed to the configured capacity.
    pub fn load_history<H: DocumentHost + ?Sized>(
        &self,
        host: &H,
        id: &FeatureId,
    ) -> TrackerResult<(HistoryLedger, usize)> {
        read_history(host, id, self.history_length)
    }

    fn ensure_properties<H: DocumentHost + ?Sized>(
        &self,
        host: &H,
        id: &FeatureId,
    ) -> TrackerResult<()> {
        if !host.has_property(id, FEATURE_HISTORY)? {
            host.add_property(
                id,
                FEATURE_HISTORY,
                PropertyKind::StringList,
                META_GROUP,
                "Feature change history",
            )?;
        }
        if !host.has_property(id, FEATURE_HASH)? {
            host.add_property(id, FEATURE_HASH, PropertyKind::Text, META_GROUP, "Feature hash")?;
        }
        Ok(())
    }
}

/// Reads and decodes the `FeatureHistory` property of `id`.
pub fn read_history<H: DocumentHost + ?Sized>(
    host: &H,
    id: &FeatureId,
    capacity: usize,
) -> TrackerResult<(HistoryLedger, usize)> {
    let value = host
        .read_property(id, FEATURE_HISTORY)
        .map_err(|e| TrackerError::unreadable(id, FEATURE_HISTORY, format!("{:#}", e)))?;
    let entries = match value {
        None => Vec::new(),
        Some(PropertyValue::StringList(items)) => HistoryLedger::decode_entries(&items)
            .map_err(|e| TrackerError::unreadable(id, FEATURE_HISTORY, e.to_string()))?,
        Some(other) => {
            return Err(TrackerError::unreadable(
                id,
                FEATURE_HISTORY,
                format!("expected string list, found {}", other.kind().as_str()),
            ))
        }
    };
    Ok(HistoryLedger::restore(capacity, entries))
}

/// Every feature that depends on `id`, directly or indirectly, in breadth-first order.
///
/// `id` itself is never part of the result, even when the host graph loops back to it.
pub fn transitive_dependents<H: DocumentHost + ?Sized>(
    host: &H,
    id: &FeatureId,
) -> TrackerResult<Vec<FeatureId>> {
    let mut seen = BTreeSet::from([id.clone()]);
    let mut queue = VecDeque::from([id.clone()]);
    let mut result = Vec::new();

    while let Some(current) = queue.pop_front() {
        for dependent in host.direct_dependents(&current)? {
            if seen.insert(dependent.clone()) {
                result.push(dependent.clone());
                queue.push_back(dependent);
            }
        }
    }

    Ok(result)
}
