use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{FeatureCatalog, FEATURE_HASH, FEATURE_HISTORY};

const CONFIG_FILE: &str = "config.json";

/// Tunables for one document tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum number of entries kept in each feature's history.
    pub history_length: usize,
    /// Maximum number of features fingerprinted per scheduler tick.
    pub batch_size: usize,
    /// Wall-clock budget of one tick in milliseconds.
    pub tick_budget_ms: u64,
    /// Pause between ticks of the cooperative driver in milliseconds.
    pub tick_interval_ms: u64,
    /// Quiet period after which an edit made outside any editor settles, in milliseconds.
    pub settle_delay_ms: u64,
    /// Properties whose changes never open or extend an edit session.
    pub ignored_properties: Vec<String>,
    /// Additional feature types and their relevant properties.
    pub extra_types: BTreeMap<String, Vec<String>>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_length: 5,
            batch_size: 50,
            tick_budget_ms: 20,
            tick_interval_ms: 200,
            settle_delay_ms: 300,
            ignored_properties: [
                FEATURE_HASH,
                FEATURE_HISTORY,
                "_GroupTouched",
                "Label",
                "Visibility",
                "FullyConstrained",
                "EditModes",
                "EditMode",
                "EditCurves",
                "EditHighlight",
                "HiddenLines",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extra_types: BTreeMap::new(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from `path`, or from the user's config directory when `None`.
    /// Returns the default config if the file doesn't exist or fails to parse.
    pub fn load(path: Option<&Path>) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    fn try_load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Self =
            serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config.normalized())
    }

    /// Clamps values that would stall the scheduler.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.tick_budget_ms = self.tick_budget_ms.max(1);
        self
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn is_ignored(&self, property: &str) -> bool {
        self.ignored_properties.iter().any(|p| p == property)
    }

    /// Built-in catalog extended with `extra_types`.
    pub fn catalog(&self) -> FeatureCatalog {
        let mut catalog = FeatureCatalog::default();
        for (type_id, props) in &self.extra_types {
            catalog.register(type_id.clone(), props.iter().cloned());
        }
        catalog
    }
}

fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "topo-ledger")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(dirs.config_dir().join(CONFIG_FILE))
}
