//! End-to-end run of a small fly dataset through the public API: catalog
//! snapshot -> spec -> session -> ordered DDL script.

use martgen::prelude::*;
use pretty_assertions::assert_eq;

fn chado_snapshot() -> CatalogSnapshot {
    let mut snap = CatalogSnapshot::new();
    snap.schema = Some("public".to_string());
    snap.add_table(
        martgen::catalog::SnapshotTable::new("feature")
            .pk("feature_id")
            .column("name")
            .column("residues")
            .fk("cvterm_id", "cvterm", "cvterm_id"),
    );
    snap.add_table(
        martgen::catalog::SnapshotTable::new("cvterm")
            .pk("cvterm_id")
            .column("name")
            .column("definition"),
    );
    snap.add_table(
        martgen::catalog::SnapshotTable::new("featureloc")
            .pk("featureloc_id")
            .fk("feature_id", "feature", "feature_id")
            .column("fmin")
            .column("fmax"),
    );
    snap
}

fn fly_spec() -> SpecFile {
    let json = r#"{
        "datasets": [{
            "name": "fly",
            "target_schema": "mart",
            "dataset_key": "feature_id",
            "units": [
                {
                    "table_type": "m",
                    "central_table": "feature",
                    "status": "imported",
                    "referenced_table": "cvterm",
                    "cardinality": "n1",
                    "sequence": 1,
                    "referenced_columns": ["name"],
                    "referenced_aliases": ["type_name"],
                    "final_table_name": "fly__feature__main"
                },
                {
                    "table_type": "m",
                    "central_table": "feature",
                    "status": "exported",
                    "referenced_table": "feature",
                    "cardinality": "11",
                    "sequence": 2,
                    "referenced_columns": ["feature_id", "name"],
                    "referenced_aliases": ["", "parent_name"],
                    "final_table_name": "fly__feature__main"
                },
                {
                    "table_type": "d",
                    "central_table": "feature",
                    "status": "exported",
                    "referenced_table": "featureloc",
                    "cardinality": "1n",
                    "sequence": 1,
                    "referenced_columns": ["fmin", "fmax"],
                    "final_table_name": "fly__chromosome_band__dm",
                    "include_central_filter": true
                }
            ]
        }]
    }"#;
    SpecFile::from_json(json).unwrap()
}

fn compiled_session() -> Session {
    let mut session = Session::new(chado_snapshot(), SessionOptions::default());
    session.load_spec(&fly_spec()).unwrap();
    session.compile().unwrap();
    session
}

#[test]
fn test_main_chain_compiles_with_expected_joins() {
    let session = compiled_session();
    let ds = &session.datasets()[0];
    let main = ds
        .transformations
        .iter()
        .find(|t| t.final_table_name == "fly__feature__main")
        .unwrap();
    assert!(main.is_compiled());

    // n1 renders as a left join against the raw source table
    let first = main.steps[0].sql.as_ref().unwrap();
    assert!(first.contains("CREATE TABLE mart.TEMP0 AS SELECT"));
    assert!(first.contains("LEFT JOIN cvterm"));
    assert!(first.contains("type_name"));

    // the self-join's key column collides with the carried chain and gets
    // suffixed; the user-aliased column comes through under its alias
    let second = main.steps[1].sql.as_ref().unwrap();
    assert!(second.contains("CREATE TABLE mart.fly__feature__main AS SELECT"));
    assert!(second.contains("feature_id_TEMP0"));
    assert!(second.contains("parent_name"));
}

#[test]
fn test_central_dimension_folds_back_onto_main() {
    let session = compiled_session();
    let ds = &session.datasets()[0];

    let dm = ds
        .transformations
        .iter()
        .find(|t| t.final_table_name == "fly__chromosome_band__dm")
        .unwrap();
    assert!(dm.is_compiled());
    assert!(dm.central);

    assert_eq!(ds.central_filter_count(), 1);
    let cf = ds
        .transformations
        .iter()
        .find(|t| t.synthetic && t.final_table_name.ends_with("_cf"))
        .unwrap();
    // the main chain already used TEMP0, so the filter's reduction staging
    // table gets the next free number
    let reduce_sql = cf.steps[0].sql.as_ref().unwrap();
    assert!(reduce_sql.contains("CREATE TABLE mart.TEMP1 AS SELECT DISTINCT feature_id"));
    let indicator_sql = cf.steps[1].sql.as_ref().unwrap();
    assert!(indicator_sql.contains("LEFT JOIN mart.TEMP1"));
    assert!(indicator_sql.contains("IS NOT NULL AS chromosome_band_bool"));
    assert!(cf.final_table().unwrap().has_column("chromosome_band_bool"));
}

#[test]
fn test_script_ordering_and_key_renames() {
    let mut session = compiled_session();
    session.compile().unwrap();
    let script = render_script(&session.emit_items().unwrap());

    let last_create = script.rfind("CREATE TABLE").unwrap();
    let first_drop = script.find("DROP TABLE").unwrap();
    let first_rename = script.find("ALTER TABLE").unwrap();
    assert!(last_create < first_drop);
    assert!(first_drop < first_rename);

    assert!(script.contains(
        "ALTER TABLE mart.fly__feature__main RENAME COLUMN feature_id TO feature_id_key;"
    ));
    assert!(script.contains("TRANSFORMATION NO 1   TARGET TABLE: FLY__FEATURE__MAIN"));
}

#[test]
fn test_emission_is_byte_deterministic_across_sessions() {
    let a = render_script(&compiled_session().emit_items().unwrap());
    let b = render_script(&compiled_session().emit_items().unwrap());
    assert_eq!(a, b);
}

#[test]
fn test_snapshot_round_trip_produces_the_same_script() {
    let json = chado_snapshot().to_json().unwrap();
    let reloaded = CatalogSnapshot::from_json(&json).unwrap();

    let mut session = Session::new(reloaded, SessionOptions::default());
    session.load_spec(&fly_spec()).unwrap();
    session.compile().unwrap();

    let direct = render_script(&compiled_session().emit_items().unwrap());
    let via_json = render_script(&session.emit_items().unwrap());
    assert_eq!(direct, via_json);
}
