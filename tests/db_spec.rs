use speculate2::speculate;
use tempfile::TempDir;
use topo_ledger::db::Database;
use topo_ledger::models::*;
use topo_ledger::DocumentHost;

fn create_feature(db: &Database, id: &str, type_id: &str, depends_on: &[&str]) -> Feature {
    db.create_feature(CreateFeatureInput {
        id: FeatureId::new(id),
        type_id: type_id.to_string(),
        label: None,
        depends_on: depends_on.iter().map(|d| FeatureId::new(*d)).collect(),
    })
    .expect("Failed to create feature")
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "features" {
        describe "create_feature" {
            it "defaults the label to the id" {
                let feature = create_feature(&db, "Pad", "PartDesign::Pad", &[]);

                assert_eq!(feature.id, FeatureId::new("Pad"));
                assert_eq!(feature.label, "Pad");
                assert_eq!(feature.type_id, "PartDesign::Pad");
            }

            it "keeps an explicit label" {
                let feature = db.create_feature(CreateFeatureInput {
                    id: FeatureId::new("Pad001"),
                    type_id: "PartDesign::Pad".to_string(),
                    label: Some("Base plate".to_string()),
                    depends_on: vec![],
                }).expect("Failed to create");

                assert_eq!(feature.label, "Base plate");
            }

            it "rejects an unknown dependency" {
                let result = db.create_feature(CreateFeatureInput {
                    id: FeatureId::new("Pad"),
                    type_id: "PartDesign::Pad".to_string(),
                    label: None,
                    depends_on: vec![FeatureId::new("Missing")],
                });

                assert!(result.is_err());
                assert!(db.get_feature(&FeatureId::new("Pad")).unwrap().is_none());
            }

            it "rejects a duplicate id" {
                create_feature(&db, "Pad", "PartDesign::Pad", &[]);
                let result = db.create_feature(CreateFeatureInput {
                    id: FeatureId::new("Pad"),
                    type_id: "Part::Box".to_string(),
                    label: None,
                    depends_on: vec![],
                });
                assert!(result.is_err());
            }
        }

        describe "get_feature" {
            it "returns None for a missing feature" {
                let result = db.get_feature(&FeatureId::new("Nope")).expect("Query failed");
                assert!(result.is_none());
            }
        }

        describe "list_features" {
            it "returns features in creation order" {
                create_feature(&db, "Zeta", "Part::Box", &[]);
                create_feature(&db, "Alpha", "Part::Box", &[]);

                let ids: Vec<_> = db.list_features().expect("Query failed")
                    .into_iter()
                    .map(|f| f.id.to_string())
                    .collect();
                assert_eq!(ids, vec!["Zeta", "Alpha"]);
            }
        }

        describe "remove_feature" {
            it "removes properties and edges with the feature" {
                let sketch = create_feature(&db, "Sketch", "Sketcher::SketchObject", &[]);
                let pad = create_feature(&db, "Pad", "PartDesign::Pad", &["Sketch"]);
                db.set_property(&pad.id, "Length", &PropertyValue::Float(5.0)).unwrap();

                assert!(db.remove_feature(&pad.id).expect("Delete failed"));
                assert!(db.get_properties(&pad.id).unwrap().is_empty());
                assert!(db.direct_dependents(&sketch.id).unwrap().is_empty());
                assert!(!db.remove_feature(&pad.id).unwrap());
            }
        }
    }

    describe "dependencies" {
        it "reports dependencies in declaration order" {
            create_feature(&db, "SketchB", "Sketcher::SketchObject", &[]);
            create_feature(&db, "SketchA", "Sketcher::SketchObject", &[]);
            let loft = create_feature(&db, "Loft", "PartDesign::AdditiveLoft", &["SketchB", "SketchA"]);

            let deps = db.direct_dependencies(&loft.id).unwrap();
            assert_eq!(deps, vec![FeatureId::new("SketchB"), FeatureId::new("SketchA")]);
        }

        it "reports dependents sorted by id" {
            let sketch = create_feature(&db, "Sketch", "Sketcher::SketchObject", &[]);
            create_feature(&db, "Pocket", "PartDesign::Pocket", &["Sketch"]);
            create_feature(&db, "Pad", "PartDesign::Pad", &["Sketch"]);

            let dependents = db.direct_dependents(&sketch.id).unwrap();
            assert_eq!(dependents, vec![FeatureId::new("Pad"), FeatureId::new("Pocket")]);
        }

        it "ignores a repeated edge" {
            let sketch = create_feature(&db, "Sketch", "Sketcher::SketchObject", &[]);
            let pad = create_feature(&db, "Pad", "PartDesign::Pad", &["Sketch"]);

            db.add_dependency(&pad.id, &sketch.id).expect("Link failed");
            assert_eq!(db.direct_dependencies(&pad.id).unwrap().len(), 1);
        }
    }

    describe "properties" {
        it "stores typed values" {
            let pad = create_feature(&db, "Pad", "PartDesign::Pad", &[]);
            let placement = PropertyValue::Placement(Placement {
                base: Vector::new(1.0, 2.0, 3.0),
                rotation: [0.0, 0.0, 0.0, 1.0],
            });
            db.set_property(&pad.id, "Placement", &placement).unwrap();
            db.set_property(&pad.id, "Length", &PropertyValue::Float(10.0)).unwrap();

            assert_eq!(db.read_property(&pad.id, "Placement").unwrap(), Some(placement));
            assert_eq!(db.read_property(&pad.id, "Length").unwrap(), Some(PropertyValue::Float(10.0)));
            assert_eq!(db.read_property(&pad.id, "Offset").unwrap(), None);
        }

        it "overwrites a value and its kind" {
            let pad = create_feature(&db, "Pad", "PartDesign::Pad", &[]);
            db.set_property(&pad.id, "Length", &PropertyValue::Float(10.0)).unwrap();
            db.set_property(&pad.id, "Length", &PropertyValue::Integer(12)).unwrap();

            let properties = db.get_properties(&pad.id).unwrap();
            assert_eq!(properties, vec![("Length".to_string(), Some(PropertyValue::Integer(12)))]);
        }

        it "fails to read from a missing feature" {
            assert!(db.read_property(&FeatureId::new("Nope"), "Length").is_err());
        }

        it "adds an empty property once" {
            let pad = create_feature(&db, "Pad", "PartDesign::Pad", &[]);
            assert!(!db.has_property(&pad.id, FEATURE_HASH).unwrap());

            db.add_property(&pad.id, FEATURE_HASH, PropertyKind::Text, META_GROUP, "Feature hash").unwrap();
            db.write_property(&pad.id, FEATURE_HASH, &PropertyValue::Text("abc".to_string())).unwrap();
            db.add_property(&pad.id, FEATURE_HASH, PropertyKind::Text, META_GROUP, "Feature hash").unwrap();

            assert!(db.has_property(&pad.id, FEATURE_HASH).unwrap());
            assert_eq!(
                db.read_property(&pad.id, FEATURE_HASH).unwrap(),
                Some(PropertyValue::Text("abc".to_string()))
            );
        }

        it "refuses a value of a different kind than the slot" {
            let pad = create_feature(&db, "Pad", "PartDesign::Pad", &[]);
            db.add_property(&pad.id, FEATURE_HASH, PropertyKind::Text, META_GROUP, "Feature hash").unwrap();

            let result = db.write_property(&pad.id, FEATURE_HASH, &PropertyValue::Float(1.0));
            assert!(result.is_err());
            assert_eq!(db.read_property(&pad.id, FEATURE_HASH).unwrap(), None);
        }

        it "writes several properties as one unit" {
            let pad = create_feature(&db, "Pad", "PartDesign::Pad", &[]);
            db.add_property(&pad.id, FEATURE_HASH, PropertyKind::Text, META_GROUP, "Feature hash").unwrap();
            db.add_property(&pad.id, FEATURE_HISTORY, PropertyKind::StringList, META_GROUP, "History").unwrap();

            db.write_properties(&pad.id, &[
                (FEATURE_HASH, PropertyValue::Text("abc".to_string())),
                (FEATURE_HISTORY, PropertyValue::StringList(vec!["entry".to_string()])),
            ]).expect("Write failed");

            assert_eq!(
                db.read_property(&pad.id, FEATURE_HASH).unwrap(),
                Some(PropertyValue::Text("abc".to_string()))
            );
            assert_eq!(
                db.read_property(&pad.id, FEATURE_HISTORY).unwrap(),
                Some(PropertyValue::StringList(vec!["entry".to_string()]))
            );
        }

        it "leaves every property untouched when one write of a unit fails" {
            let pad = create_feature(&db, "Pad", "PartDesign::Pad", &[]);
            db.add_property(&pad.id, FEATURE_HASH, PropertyKind::Text, META_GROUP, "Feature hash").unwrap();

            let result = db.write_properties(&pad.id, &[
                (FEATURE_HASH, PropertyValue::Text("abc".to_string())),
                (FEATURE_HISTORY, PropertyValue::StringList(vec!["entry".to_string()])),
            ]);

            assert!(result.is_err());
            assert_eq!(db.read_property(&pad.id, FEATURE_HASH).unwrap(), None);
        }

        it "refuses to write a property that was never added" {
            let pad = create_feature(&db, "Pad", "PartDesign::Pad", &[]);
            let result = db.write_property(&pad.id, FEATURE_HASH, &PropertyValue::Text("abc".to_string()));
            assert!(result.is_err());
        }
    }

    describe "tracking flag" {
        it "defaults to enabled" {
            assert!(db.tracking_enabled().unwrap());
        }

        it "persists a change" {
            db.set_tracking_enabled(false).unwrap();
            assert!(!db.tracking_enabled().unwrap());
            db.set_tracking_enabled(true).unwrap();
            assert!(db.tracking_enabled().unwrap());
        }
    }

    describe "on disk" {
        it "keeps features across reopening" {
            let dir = TempDir::new().expect("Failed to create temp dir");
            let path = dir.path().join("nested").join("document.db");

            {
                let db = Database::open(path.clone()).expect("Failed to open");
                db.migrate().expect("Failed to migrate");
                create_feature(&db, "Pad", "PartDesign::Pad", &[]);
                db.set_tracking_enabled(false).unwrap();
            }

            let db = Database::open(path).expect("Failed to reopen");
            db.migrate().expect("Failed to migrate again");
            assert!(db.get_feature(&FeatureId::new("Pad")).unwrap().is_some());
            assert!(!db.tracking_enabled().unwrap());
        }
    }
}
