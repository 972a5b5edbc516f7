use topo_ledger::db::Database;
use topo_ledger::fingerprint::stored_hash;
use topo_ledger::host::RecordingConsole;
use topo_ledger::models::*;
use topo_ledger::scheduler::drive;
use topo_ledger::{DocumentTracker, TrackerConfig};

fn setup() -> Database {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    db
}

fn fast_config() -> TrackerConfig {
    TrackerConfig {
        settle_delay_ms: 20,
        tick_interval_ms: 5,
        ..TrackerConfig::default()
    }
}

fn feature(db: &Database, id: &str, type_id: &str, depends_on: &[&str]) -> FeatureId {
    db.create_feature(CreateFeatureInput {
        id: FeatureId::new(id),
        type_id: type_id.to_string(),
        label: None,
        depends_on: depends_on.iter().map(|d| FeatureId::new(*d)).collect(),
    })
    .expect("Failed to create feature")
    .id
}

mod drive_loop {
    use super::*;

    #[tokio::test]
    async fn returns_after_one_tick_when_idle() {
        let db = setup();
        let mut tracker = DocumentTracker::new(db, fast_config()).with_console(RecordingConsole::new());

        let report = drive(&mut tracker).await;

        assert_eq!(report.ticks, 1);
        assert_eq!(report.processed, 0);
        assert!(tracker.is_quiescent());
    }

    #[tokio::test]
    async fn drains_a_full_analysis_in_slices() {
        let db = setup();
        for n in 0..30 {
            let id = feature(&db, &format!("Box{:03}", n), "Part::Box", &[]);
            db.set_property(&id, "Length", &PropertyValue::Float(n as f64))
                .expect("Failed to set length");
        }
        let config = TrackerConfig {
            batch_size: 5,
            ..fast_config()
        };
        let mut tracker = DocumentTracker::new(db.clone(), config).with_console(RecordingConsole::new());

        assert_eq!(tracker.run_full_analysis(), 30);
        let report = drive(&mut tracker).await;

        assert_eq!(report.processed, 30);
        assert_eq!(report.changed, 30);
        assert!(report.ticks >= 6);
        assert!(tracker.pending().is_empty());
        for f in db.list_features().expect("Failed to list") {
            assert!(stored_hash(&db, &f.id).unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn waits_for_an_unattended_change_to_settle() {
        let db = setup();
        let sketch = feature(&db, "Sketch", "Sketcher::SketchObject", &[]);
        feature(&db, "Pad", "PartDesign::Pad", &["Sketch"]);
        let mut tracker = DocumentTracker::new(db.clone(), fast_config()).with_console(RecordingConsole::new());

        db.set_property(&sketch, "Geometry", &PropertyValue::StringList(vec!["Line(0,0,1,0)".to_string()]))
            .expect("Failed to set geometry");
        tracker.on_property_changed(&sketch, "Geometry");
        let report = drive(&mut tracker).await;

        assert_eq!(report.settled, 1);
        assert_eq!(report.processed, 2);
        assert!(report.ticks > 1);
        assert!(tracker.session(&sketch).is_none());
    }

    #[tokio::test]
    async fn counts_failed_features() {
        let db = setup();
        feature(&db, "Sketch", "Sketcher::SketchObject", &[]);
        feature(&db, "Note", "App::Annotation", &[]);
        let console = RecordingConsole::new();
        let mut tracker = DocumentTracker::new(db, fast_config()).with_console(console.clone());

        tracker.run_full_analysis();
        let report = drive(&mut tracker).await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(tracker.deferred(), vec![FeatureId::new("Note")]);
        assert!(console.errors().iter().any(|line| line.contains("Note")));
    }
}
