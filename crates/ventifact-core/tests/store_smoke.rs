use chrono::{DateTime, TimeZone, Utc};
use tempfile::tempdir;
use ventifact_core::digest::{canonical_members, test_blueprint_id};
use ventifact_core::errors::StoreError;
use ventifact_core::model::{RunId, Source, TestResult, TestRun};
use ventifact_core::storage::store::Store;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

fn run(ext_id: i64, results: &[(&str, bool)], timestamp: DateTime<Utc>) -> TestRun {
    TestRun {
        id: RunId {
            source: Source::Circleci,
            ext_id,
        },
        results: results
            .iter()
            .map(|(title, passed)| TestResult {
                title: title.to_string(),
                passed: *passed,
            })
            .collect(),
        timestamp,
        branch: Some("main".into()),
        commit_id: vec![0xab; 20],
    }
}

#[test]
fn all_pass_run_lifecycle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("ventifact.db");

    let store = Store::open(&db_path)?;
    store.init_schema()?;
    assert!(store.insert_test_run(&run(1, &[("boot", true), ("ipc", true), ("ui", true)], at(9)))?);

    // Verify through a raw connection.
    let conn = rusqlite::Connection::open(&db_path)?;

    let blueprints: i64 = conn.query_row("SELECT count(*) FROM test_blueprints", [], |r| r.get(0))?;
    assert_eq!(blueprints, 3);

    let (run_blueprints, members): (i64, Vec<u8>) = conn.query_row(
        "SELECT count(*), test_blueprint_ids FROM test_run_blueprints",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!(run_blueprints, 1);

    let ids: Vec<_> = ["boot", "ipc", "ui"]
        .iter()
        .map(|t| test_blueprint_id(t))
        .collect();
    let expected: Vec<u8> = canonical_members(&ids)
        .iter()
        .flat_map(|id| id.to_bytes())
        .collect();
    assert_eq!(members, expected);

    let spec: Option<Vec<u8>> =
        conn.query_row("SELECT result_spec FROM test_runs", [], |r| r.get(0))?;
    assert_eq!(spec, None);

    Ok(())
}

#[test]
fn single_failure_enumerates_the_failure() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("ventifact.db");
    let store = Store::open(&db_path)?;
    store.init_schema()?;

    // Duplicate titles are legal: member ids keep their multiplicity.
    store.insert_test_run(&run(
        7,
        &[("a", true), ("a", true), ("a", true), ("b", false)],
        at(10),
    ))?;

    let conn = rusqlite::Connection::open(&db_path)?;
    let spec: Vec<u8> = conn.query_row("SELECT result_spec FROM test_runs", [], |r| r.get(0))?;
    let mut expected = vec![0x00];
    expected.extend_from_slice(&test_blueprint_id("b").to_bytes());
    assert_eq!(spec, expected);

    // "a" three times dedups to one blueprint row.
    let blueprints: i64 = conn.query_row("SELECT count(*) FROM test_blueprints", [], |r| r.get(0))?;
    assert_eq!(blueprints, 2);

    Ok(())
}

#[test]
fn majority_failure_enumerates_the_passes() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    store.insert_test_run(&run(
        8,
        &[("a1", false), ("a2", false), ("a3", false), ("b", true)],
        at(11),
    ))?;

    let runs = store.fetch_recent_test_runs(10, None)?;
    assert_eq!(runs.len(), 1);
    assert!(!runs[0].succeeded);
    Ok(())
}

#[test]
fn identical_shapes_share_one_run_blueprint() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    // Same member set, different listing order.
    store.insert_test_run(&run(1, &[("boot", true), ("ipc", true)], at(9)))?;
    store.insert_test_run(&run(2, &[("ipc", true), ("boot", true)], at(10)))?;

    assert_eq!(store.count_rows("test_run_blueprints")?, 1);
    assert_eq!(store.count_rows("test_blueprints")?, 2);
    assert_eq!(store.count_rows("test_runs")?, 2);
    Ok(())
}

#[test]
fn ingest_is_idempotent() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    let r = run(5, &[("boot", true), ("ipc", false)], at(9));
    assert!(store.insert_test_run(&r)?);
    assert!(!store.insert_test_run(&r)?);

    assert_eq!(store.count_rows("test_runs")?, 1);
    assert_eq!(store.count_rows("test_run_blueprints")?, 1);
    assert_eq!(store.count_rows("test_blueprints")?, 2);
    Ok(())
}

#[test]
fn malformed_runs_are_rejected_before_any_write() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    let empty = run(1, &[], at(9));
    assert!(matches!(
        store.insert_test_run(&empty),
        Err(StoreError::ExternalInput(_))
    ));

    let mut no_commit = run(2, &[("boot", true)], at(9));
    no_commit.commit_id.clear();
    assert!(matches!(
        store.insert_test_run(&no_commit),
        Err(StoreError::ExternalInput(_))
    ));

    let negative = run(-3, &[("boot", true)], at(9));
    assert!(matches!(
        store.insert_test_run(&negative),
        Err(StoreError::ExternalInput(_))
    ));

    assert_eq!(store.count_rows("test_runs")?, 0);
    assert_eq!(store.count_rows("test_blueprints")?, 0);
    Ok(())
}

#[test]
fn stats_reflect_ingested_rows() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    store.insert_test_run(&run(1, &[("boot", true), ("ipc", true)], at(9)))?;
    store.insert_test_run(&run(2, &[("boot", true), ("ipc", true)], at(11)))?;

    let stats = store.stats_best_effort();
    assert_eq!(stats.test_runs, Some(2));
    assert_eq!(stats.test_blueprints, Some(2));
    assert_eq!(stats.test_run_blueprints, Some(1));
    assert_eq!(stats.test_flakes, Some(0));
    assert_eq!(stats.last_run_at, Some(at(11)));
    Ok(())
}

#[test]
fn recent_runs_are_newest_first_and_windowed() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    store.insert_test_run(&run(1, &[("boot", true)], at(8)))?;
    store.insert_test_run(&run(2, &[("boot", true)], at(9)))?;
    store.insert_test_run(&run(3, &[("boot", false)], at(10)))?;

    let recent = store.fetch_recent_test_runs(2, None)?;
    assert_eq!(
        recent.iter().map(|r| r.id.ext_id).collect::<Vec<_>>(),
        vec![3, 2]
    );
    assert!(!recent[0].succeeded);
    assert!(recent[1].succeeded);

    let windowed = store.fetch_recent_test_runs(10, Some(at(8)))?;
    assert_eq!(
        windowed.iter().map(|r| r.id.ext_id).collect::<Vec<_>>(),
        vec![3, 2]
    );
    Ok(())
}
