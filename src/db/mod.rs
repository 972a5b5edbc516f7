mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::host::DocumentHost;
use crate::models::*;

const TRACKING_FLAG: &str = "tracking_enabled";

/// A parametric document stored in SQLite.
///
/// Features, their typed properties and their dependency edges live in one database
/// file. This is the host the `topo-ledger` binary tracks; inside a CAD application the
/// application's own document plays this role through [`DocumentHost`].
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "topo-ledger")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("document.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        schema::run_migrations(&conn)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }

    // ============================================================
    // Feature operations
    // ============================================================

    pub fn create_feature(&self, input: CreateFeatureInput) -> Result<Feature> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let label = input.label.unwrap_or_else(|| input.id.to_string());

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO features (id, type_id, label, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            (input.id.as_str(), &input.type_id, &label, &now, &now),
        )
        .with_context(|| format!("Failed to create feature {}", input.id))?;
        for (position, dep) in input.depends_on.iter().enumerate() {
            tx.execute(
                "INSERT INTO dependencies (feature_id, depends_on, position) VALUES (?, ?, ?)",
                (input.id.as_str(), dep.as_str(), position as i64),
            )
            .with_context(|| format!("Unknown dependency {} of {}", dep, input.id))?;
        }
        tx.commit()?;

        Ok(Feature {
            id: input.id,
            type_id: input.type_id,
            label,
        })
    }

    pub fn get_feature(&self, id: &FeatureId) -> Result<Option<Feature>> {
        let conn = self.conn();
        let feature = conn
            .query_row(
                "SELECT id, type_id, label FROM features WHERE id = ?",
                [id.as_str()],
                |row| {
                    Ok(Feature {
                        id: FeatureId::new(row.get::<_, String>(0)?),
                        type_id: row.get(1)?,
                        label: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(feature)
    }

    /// All features in creation order.
    pub fn list_features(&self) -> Result<Vec<Feature>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, type_id, label FROM features ORDER BY rowid")?;

        let features = stmt
            .query_map([], |row| {
                Ok(Feature {
                    id: FeatureId::new(row.get::<_, String>(0)?),
                    type_id: row.get(1)?,
                    label: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(features)
    }

    /// Deletes a feature with its properties and every edge touching it.
    pub fn remove_feature(&self, id: &FeatureId) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM features WHERE id = ?", [id.as_str()])?;
        Ok(rows > 0)
    }

    pub fn add_dependency(&self, id: &FeatureId, depends_on: &FeatureId) -> Result<()> {
        let conn = self.conn();
        let position: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dependencies WHERE feature_id = ?",
            [id.as_str()],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO dependencies (feature_id, depends_on, position) VALUES (?, ?, ?)",
            (id.as_str(), depends_on.as_str(), position),
        )
        .with_context(|| format!("Failed to link {} to {}", id, depends_on))?;
        Ok(())
    }

    // ============================================================
    // Property operations
    // ============================================================

    /// Sets a property, creating it when missing. This is the user-edit path; the
    /// tracker itself writes through [`DocumentHost::write_property`].
    pub fn set_property(&self, id: &FeatureId, name: &str, value: &PropertyValue) -> Result<()> {
        let conn = self.conn();
        let json = serde_json::to_string(value)?;
        conn.execute(
            "INSERT INTO properties (feature_id, name, kind, prop_group, doc, value)
             VALUES (?, ?, ?, NULL, NULL, ?)
             ON CONFLICT (feature_id, name) DO UPDATE SET kind = excluded.kind, value = excluded.value",
            (id.as_str(), name, value.kind().as_str(), &json),
        )
        .with_context(|| format!("Failed to set {} on {}", name, id))?;
        touch_feature(&conn, id)?;
        Ok(())
    }

    /// Every property of a feature with its value, sorted by name.
    pub fn get_properties(&self, id: &FeatureId) -> Result<Vec<(String, Option<PropertyValue>)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, value FROM properties WHERE feature_id = ? ORDER BY name",
        )?;

        let rows = stmt
            .query_map([id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, value)| {
                let value = value
                    .map(|json| decode_value(&json, id, &name))
                    .transpose()?;
                Ok((name, value))
            })
            .collect()
    }

    fn feature_exists(conn: &Connection, id: &FeatureId) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM features WHERE id = ?",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl DocumentHost for Database {
    fn feature_ids(&self) -> Result<Vec<FeatureId>> {
        Ok(self.list_features()?.into_iter().map(|f| f.id).collect())
    }

    fn type_id(&self, id: &FeatureId) -> Result<String> {
        self.get_feature(id)?
            .map(|f| f.type_id)
            .ok_or_else(|| anyhow::anyhow!("Feature not found: {}", id))
    }

    fn direct_dependencies(&self, id: &FeatureId) -> Result<Vec<FeatureId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT depends_on FROM dependencies WHERE feature_id = ? ORDER BY position",
        )?;
        let ids = stmt
            .query_map([id.as_str()], |row| row.get::<_, String>(0))?
            .map(|r| r.map(FeatureId::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn direct_dependents(&self, id: &FeatureId) -> Result<Vec<FeatureId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT feature_id FROM dependencies WHERE depends_on = ? ORDER BY feature_id",
        )?;
        let ids = stmt
            .query_map([id.as_str()], |row| row.get::<_, String>(0))?
            .map(|r| r.map(FeatureId::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn read_property(&self, id: &FeatureId, name: &str) -> Result<Option<PropertyValue>> {
        let conn = self.conn();
        if !Self::feature_exists(&conn, id)? {
            anyhow::bail!("Feature not found: {}", id);
        }
        let value: Option<Option<String>> = conn
            .query_row(
                "SELECT value FROM properties WHERE feature_id = ? AND name = ?",
                (id.as_str(), name),
                |row| row.get(0),
            )
            .optional()?;

        value
            .flatten()
            .map(|json| decode_value(&json, id, name))
            .transpose()
    }

    fn write_property(&self, id: &FeatureId, name: &str, value: &PropertyValue) -> Result<()> {
        let conn = self.conn();
        write_declared(&conn, id, name, value)
    }

    fn write_properties(&self, id: &FeatureId, values: &[(&str, PropertyValue)]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (name, value) in values {
            write_declared(&tx, id, name, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn has_property(&self, id: &FeatureId, name: &str) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM properties WHERE feature_id = ? AND name = ?",
            (id.as_str(), name),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn add_property(
        &self,
        id: &FeatureId,
        name: &str,
        kind: PropertyKind,
        group: &str,
        doc: &str,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO properties (feature_id, name, kind, prop_group, doc, value)
             VALUES (?, ?, ?, ?, ?, NULL)",
            (id.as_str(), name, kind.as_str(), group, doc),
        )
        .with_context(|| format!("Failed to add property {} to {}", name, id))?;
        Ok(())
    }

    fn tracking_enabled(&self) -> Result<bool> {
        let conn = self.conn();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM document_flags WHERE key = ?",
                [TRACKING_FLAG],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map_or(true, |v| v == "1"))
    }

    fn set_tracking_enabled(&self, enabled: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO document_flags (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (
                TRACKING_FLAG,
                if enabled { "1" } else { "0" },
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn touch_feature(conn: &Connection, id: &FeatureId) -> Result<()> {
    let rows = conn.execute(
        "UPDATE features SET updated_at = ? WHERE id = ?",
        (Utc::now().to_rfc3339(), id.as_str()),
    )?;
    if rows == 0 {
        anyhow::bail!("Feature not found: {}", id);
    }
    Ok(())
}

/// Writes into a slot created by `add_property` or `set_property`; the value must match
/// the slot's declared kind.
fn write_declared(conn: &Connection, id: &FeatureId, name: &str, value: &PropertyValue) -> Result<()> {
    let kind: Option<String> = conn
        .query_row(
            "SELECT kind FROM properties WHERE feature_id = ? AND name = ?",
            (id.as_str(), name),
            |row| row.get(0),
        )
        .optional()?;
    let Some(kind) = kind else {
        anyhow::bail!("Property {} does not exist on {}", name, id);
    };
    let declared = PropertyKind::from_str(&kind)
        .ok_or_else(|| anyhow::anyhow!("Property {} on {} has unknown kind {}", name, id, kind))?;
    if declared != value.kind() {
        anyhow::bail!(
            "Property {} on {} holds {}, not {}",
            name,
            id,
            declared.as_str(),
            value.kind().as_str()
        );
    }

    let json = serde_json::to_string(value)?;
    conn.execute(
        "UPDATE properties SET value = ? WHERE feature_id = ? AND name = ?",
        (&json, id.as_str(), name),
    )?;
    Ok(())
}

fn decode_value(json: &str, id: &FeatureId, name: &str) -> Result<PropertyValue> {
    serde_json::from_str(json)
        .with_context(|| format!("Stored value of {} on {} is not a valid property", name, id))
}
