//! Domain models for topo-ledger.
//!
//! # Core Concepts
//!
//! ## Persisted on the feature
//!
//! - [`FeatureHash`]: content fingerprint of a feature's relevant state and its
//!   dependencies' fingerprints.
//! - [`HistoryEntry`] / [`HistoryLedger`]: bounded, append-only log of fingerprint changes.
//!
//! ## Host-owned
//!
//! - [`Feature`] and its [`PropertyValue`]s. The tracker only reads them.
//! - [`FeatureCatalog`]: which properties are topology-relevant for each feature type.
//!
//! ## Transient
//!
//! These exist only while the document is open:
//!
//! - [`SessionState`]: an edit in progress on one feature.
//! - [`SettleEvent`]: emitted once when that edit concludes.

mod catalog;
mod feature;
mod history;
mod session;

pub use catalog::*;
pub use feature::*;
pub use history::*;
pub use session::*;
