use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use topo_ledger::coordinator::read_history;
use topo_ledger::db::Database;
use topo_ledger::fingerprint::stored_hash;
use topo_ledger::models::*;
use topo_ledger::scheduler::drive;
use topo_ledger::{Console, DocumentHost, DocumentTracker, TrackerConfig};

#[derive(Parser)]
#[command(name = "topo-ledger")]
#[command(about = "Stable feature fingerprints and change history for parametric documents")]
struct Cli {
    /// Document database (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Tracker configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a feature
    Add {
        /// Internal name, e.g. Sketch001
        id: String,
        /// Type tag, e.g. Sketcher::SketchObject
        type_id: String,
        #[arg(long)]
        label: Option<String>,
        /// Upstream feature (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
    },
    /// Change one property outside any editor
    Set {
        feature: String,
        property: String,
        /// JSON value, e.g. 12.5, true, "text" or {"vector":{"x":0,"y":0,"z":1}}
        value: String,
    },
    /// Open an editor on a feature, apply PROPERTY=VALUE changes, close it
    Edit {
        feature: String,
        #[arg(required = true)]
        changes: Vec<String>,
    },
    /// Fingerprint every feature of the document
    Analyze,
    /// Enable or disable tracking for the document
    Toggle { state: Switch },
    /// Show a feature's fingerprint and history
    Show { feature: String },
    /// List features with their fingerprints
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

/// Console lines go to stdout, problems to stderr.
struct StdConsole;

impl Console for StdConsole {
    fn message(&self, line: &str) {
        println!("{}", line);
    }

    fn warning(&self, line: &str) {
        eprintln!("warning: {}", line);
    }

    fn error(&self, line: &str) {
        eprintln!("error: {}", line);
    }
}

/// Logs go to stderr so stdout only carries command output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "topo_ledger=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Accepts a tagged [`PropertyValue`] or plain JSON scalars.
fn parse_value(raw: &str) -> Result<PropertyValue> {
    if let Ok(value) = serde_json::from_str::<PropertyValue>(raw) {
        return Ok(value);
    }
    let json: serde_json::Value = match serde_json::from_str(raw) {
        Ok(json) => json,
        Err(_) => return Ok(PropertyValue::Text(raw.to_string())),
    };
    match json {
        serde_json::Value::Bool(b) => Ok(PropertyValue::Bool(b)),
        serde_json::Value::Number(n) if n.is_i64() => {
            Ok(PropertyValue::Integer(n.as_i64().unwrap_or_default()))
        }
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(PropertyValue::Float)
            .ok_or_else(|| anyhow::anyhow!("Unsupported number: {}", n)),
        serde_json::Value::String(s) => Ok(PropertyValue::Text(s)),
        other => anyhow::bail!("Unsupported property value: {}", other),
    }
}

fn parse_change(raw: &str) -> Result<(String, PropertyValue)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("Expected PROPERTY=VALUE, got {}", raw))?;
    Ok((name.to_string(), parse_value(value)?))
}

fn open_document(path: Option<PathBuf>) -> Result<Database> {
    let db = match path {
        Some(path) => Database::open(path)?,
        None => Database::open_default()?,
    };
    db.migrate()?;
    Ok(db)
}

fn require_feature(db: &Database, id: &FeatureId) -> Result<Feature> {
    db.get_feature(id)?
        .ok_or_else(|| anyhow::anyhow!("Feature not found: {}", id))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let db = open_document(cli.db)?;
    let config = TrackerConfig::load(cli.config.as_deref());
    let mut tracker = DocumentTracker::new(db.clone(), config.clone()).with_console(StdConsole);

    match cli.command {
        Commands::Add {
            id,
            type_id,
            label,
            depends_on,
        } => {
            let feature = db.create_feature(CreateFeatureInput {
                id: FeatureId::new(id),
                type_id,
                label,
                depends_on: depends_on.into_iter().map(FeatureId::new).collect(),
            })?;
            tracker.on_created(&feature.id);
            drive(&mut tracker).await;
        }
        Commands::Set {
            feature,
            property,
            value,
        } => {
            let id = FeatureId::new(feature);
            require_feature(&db, &id)?;
            db.set_property(&id, &property, &parse_value(&value)?)?;
            tracker.on_property_changed(&id, &property);
            drive(&mut tracker).await;
        }
        Commands::Edit { feature, changes } => {
            let id = FeatureId::new(feature);
            require_feature(&db, &id)?;
            let changes = changes
                .iter()
                .map(|c| parse_change(c))
                .collect::<Result<Vec<_>>>()?;

            tracker.on_edit_opened(&id);
            for (name, value) in &changes {
                db.set_property(&id, name, value)?;
                tracker.on_property_changed(&id, name);
            }
            tracker.on_edit_closed(&id);
            drive(&mut tracker).await;
        }
        Commands::Analyze => {
            tracker.run_full_analysis();
            let report = drive(&mut tracker).await;
            println!(
                "Done: {} features processed, {} changed, {} failed in {} ticks",
                report.processed, report.changed, report.failed, report.ticks
            );
        }
        Commands::Toggle { state } => {
            tracker.set_tracking(matches!(state, Switch::On));
        }
        Commands::Show { feature } => {
            let id = FeatureId::new(feature);
            let feature = require_feature(&db, &id)?;
            println!("{} ({}) [{}]", feature.id, feature.label, feature.type_id);
            match stored_hash(&db, &id)? {
                Some(hash) => println!("  hash: {}", hash),
                None => println!("  hash: -"),
            }
            let (ledger, _) = read_history(&db, &id, config.history_length)?;
            for entry in ledger.entries() {
                println!(
                    "  {}  {}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.hash.short(),
                    entry.summary
                );
            }
        }
        Commands::Status => {
            let enabled = db.tracking_enabled()?;
            println!("tracking: {}", if enabled { "on" } else { "off" });
            for feature in db.list_features()? {
                let hash = stored_hash(&db, &feature.id)?;
                println!(
                    "{:<20} {:<28} {}",
                    feature.id.as_str(),
                    feature.type_id,
                    hash.as_ref().map_or("-", FeatureHash::short)
                );
            }
        }
    }

    Ok(())
}
