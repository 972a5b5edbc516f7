//! Change tracking and stable fingerprints for features of a parametric CAD document.
//!
//! A [`tracker::DocumentTracker`] sits next to an open document. It watches raw property
//! notifications, waits until an edit has really concluded, and then fingerprints the
//! edited feature and everything downstream of it, in dependency order and in small
//! slices so the host's interactive loop never stalls. Each fingerprint is written to the
//! feature's `FeatureHash` property; the previous one moves into a bounded
//! `FeatureHistory`.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod detector;
pub mod error;
pub mod fingerprint;
pub mod host;
pub mod models;
pub mod scheduler;
pub mod tracker;

pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use host::{Console, DocumentHost};
pub use tracker::{DocumentTracker, TickReport};
