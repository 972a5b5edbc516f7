//! Interfaces the tracker consumes from the host application.
//!
//! The host owns the document: object lifetime, property storage and the recompute graph.
//! The tracker reaches it only through [`DocumentHost`] and reports through [`Console`].

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use crate::models::{FeatureId, PropertyKind, PropertyValue};

/// Read/write access to one open document.
///
/// All methods are called from the single thread that drives the tracker.
pub trait DocumentHost {
    /// Every feature in the document, in the host's own order.
    fn feature_ids(&self) -> Result<Vec<FeatureId>>;

    /// Host type tag of a feature, e.g. `Sketcher::SketchObject`.
    fn type_id(&self, id: &FeatureId) -> Result<String>;

    /// Upstream features `id` reads from.
    fn direct_dependencies(&self, id: &FeatureId) -> Result<Vec<FeatureId>>;

    /// Features that read from `id`.
    fn direct_dependents(&self, id: &FeatureId) -> Result<Vec<FeatureId>>;

    /// Current value of a property, `None` if the feature has no such property.
    fn read_property(&self, id: &FeatureId, name: &str) -> Result<Option<PropertyValue>>;

    /// Overwrites an existing property.
    fn write_property(&self, id: &FeatureId, name: &str, value: &PropertyValue) -> Result<()>;

    /// Overwrites several existing properties of one feature as a unit. Hosts with
    /// transactions should apply all values or none.
    fn write_properties(&self, id: &FeatureId, values: &[(&str, PropertyValue)]) -> Result<()> {
        for (name, value) in values {
            self.write_property(id, name, value)?;
        }
        Ok(())
    }

    fn has_property(&self, id: &FeatureId, name: &str) -> Result<bool>;

    /// Creates an empty property slot on a feature.
    fn add_property(
        &self,
        id: &FeatureId,
        name: &str,
        kind: PropertyKind,
        group: &str,
        doc: &str,
    ) -> Result<()>;

    /// Document-wide tracking flag.
    fn tracking_enabled(&self) -> Result<bool>;

    fn set_tracking_enabled(&self, enabled: bool) -> Result<()>;
}

/// Where user-facing tracker messages go.
pub trait Console {
    fn message(&self, line: &str);
    fn warning(&self, line: &str);
    fn error(&self, line: &str);
}

/// Forwards console lines to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn message(&self, line: &str) {
        tracing::info!(target: "topo_ledger::console", "{}", line);
    }

    fn warning(&self, line: &str) {
        tracing::warn!(target: "topo_ledger::console", "{}", line);
    }

    fn error(&self, line: &str) {
        tracing::error!(target: "topo_ledger::console", "{}", line);
    }
}

/// Severity of a recorded console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Message,
    Warning,
    Error,
}

/// Keeps console lines in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingConsole {
    lines: Rc<RefCell<Vec<(ConsoleLevel, String)>>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(ConsoleLevel, String)> {
        self.lines.borrow().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.filtered(ConsoleLevel::Message)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.filtered(ConsoleLevel::Warning)
    }

    pub fn errors(&self) -> Vec<String> {
        self.filtered(ConsoleLevel::Error)
    }

    fn filtered(&self, level: ConsoleLevel) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    fn push(&self, level: ConsoleLevel, line: &str) {
        self.lines.borrow_mut().push((level, line.to_string()));
    }
}

impl Console for RecordingConsole {
    fn message(&self, line: &str) {
        self.push(ConsoleLevel::Message, line);
    }

    fn warning(&self, line: &str) {
        self.push(ConsoleLevel::Warning, line);
    }

    fn error(&self, line: &str) {
        self.push(ConsoleLevel::Error, line);
    }
}
