use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::feature::PropertyValue;

/// Content fingerprint of a feature: lowercase hex SHA-256, 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureHash(String);

impl FeatureHash {
    pub const LEN: usize = 64;

    /// Wraps an already computed hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for console output.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for FeatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fingerprint change recorded on a feature.
///
/// `hash` is the fingerprint that became current at `timestamp`; `previous_hash` is the
/// value it replaced (`None` on first attachment). Entries are never edited after they
/// are appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub hash: FeatureHash,
    #[serde(default)]
    pub previous_hash: Option<FeatureHash>,
    /// What changed: touched property names, or "dependency changed".
    pub summary: String,
}

impl HistoryEntry {
    /// True when the entry records a settle that produced no new fingerprint.
    pub fn is_noop(&self) -> bool {
        self.previous_hash.as_ref() == Some(&self.hash)
    }
}

/// Bounded, oldest-first sequence of [`HistoryEntry`] records.
///
/// Appending past `capacity` evicts the oldest entry, so `len() <= capacity` holds after
/// every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLedger {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl HistoryLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    /// Rebuilds a ledger from stored entries, keeping only the `capacity` most recent.
    ///
    /// Returns the ledger and the number of entries that had to be dropped. A non-zero
    /// count means the stored history broke the capacity bound.
    pub fn restore(capacity: usize, entries: Vec<HistoryEntry>) -> (Self, usize) {
        let mut entries = VecDeque::from(entries);
        let excess = entries.len().saturating_sub(capacity);
        entries.drain(..excess);
        (Self { capacity, entries }, excess)
    }

    /// Appends an entry, returning the evicted oldest entry when the ledger was full.
    pub fn push(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        if self.capacity == 0 {
            return Some(entry);
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Encodes the ledger as the `FeatureHistory` property value: one JSON document per
    /// entry, oldest first.
    pub fn to_property(&self) -> Result<PropertyValue, serde_json::Error> {
        let items = self
            .entries
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PropertyValue::StringList(items))
    }

    /// Decodes entries stored by [`HistoryLedger::to_property`].
    pub fn decode_entries(items: &[String]) -> Result<Vec<HistoryEntry>, serde_json::Error> {
        items.iter().map(|item| serde_json::from_str(item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            hash: FeatureHash::from_hex(format!("{:064x}", n)),
            previous_hash: None,
            summary: format!("edit {}", n),
        }
    }

    #[test]
    fn test_push_evicts_oldest_at_capacity() {
        let mut ledger = HistoryLedger::new(3);
        for n in 0..3 {
            assert!(ledger.push(entry(n)).is_none());
        }

        let evicted = ledger.push(entry(3)).unwrap();
        assert_eq!(evicted.summary, "edit 0");
        assert_eq!(ledger.len(), 3);

        let summaries: Vec<_> = ledger.entries().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, vec!["edit 1", "edit 2", "edit 3"]);
    }

    #[test]
    fn test_restore_trims_to_most_recent() {
        let (ledger, trimmed) = HistoryLedger::restore(2, (0..5).map(entry).collect());
        assert_eq!(trimmed, 3);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.latest().unwrap().summary, "edit 4");
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut ledger = HistoryLedger::new(0);
        assert!(ledger.push(entry(1)).is_some());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_property_encoding_preserves_order() {
        let mut ledger = HistoryLedger::new(5);
        ledger.push(entry(1));
        ledger.push(entry(2));

        let value = ledger.to_property().unwrap();
        let items = value.as_string_list().unwrap();
        let decoded = HistoryLedger::decode_entries(items).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].summary, "edit 1");
        assert_eq!(decoded[1].summary, "edit 2");
    }

    #[test]
    fn test_short_hash() {
        let hash = FeatureHash::from_hex("abcdef0123456789");
        assert_eq!(hash.short(), "abcdef01");
        assert_eq!(FeatureHash::from_hex("abc").short(), "abc");
    }
}
