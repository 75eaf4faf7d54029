//! End-to-end scenarios for the staging & promotion protocol (§8), run
//! through the full planner -> read path -> staging pipeline against the
//! mock drivers. Lives here rather than as a unit test since it spans
//! `elt-core`, `elt-drivers`, and `elt-engine`.

use elt_core::{Column, ColumnType, Config, ConnInfo, Mode, RunOptions, SourceSpec, TargetSpec};
use elt_drivers::MockDatabaseDriver;
use std::collections::HashMap;

fn conn(tag: &str) -> ConnInfo {
    ConnInfo { type_tag: tag.into(), url: String::new(), credentials: HashMap::new() }
}

fn db_to_db_config(mode: Mode, stream: &str, target: &str) -> Config {
    Config {
        src_conn: conn("mock_db"),
        source: SourceSpec { stream: stream.into(), ..Default::default() },
        tgt_conn: conn("mock_db"),
        target: TargetSpec { object: target.into(), ..Default::default() },
        mode,
        options: RunOptions::default(),
        env: HashMap::new(),
    }
}

fn seed(driver: &MockDatabaseDriver, table: &str, rows: &[(i64, &str)]) {
    let columns = vec![Column::new("id", ColumnType::Integer, false), Column::new("name", ColumnType::Text, true)];
    let values: Vec<Vec<serde_json::Value>> =
        rows.iter().map(|(id, name)| vec![serde_json::json!(id), serde_json::json!(name)]).collect();
    let batch = elt_core::rows_to_batch(&columns, &values).unwrap();
    driver.seed(table, columns, &batch);
}

/// Full refresh: source rows land in the final table via a temp-table load
/// and an insert-select promotion, with no leaked temp table afterward.
#[tokio::test]
async fn full_refresh_moves_all_rows_and_cleans_up_temp() {
    let driver = MockDatabaseDriver::new();
    seed(&driver, "src", &[(1, "a"), (2, "b"), (3, "c")]);

    let config = db_to_db_config(Mode::FullRefresh, "src", "dst").prepare().unwrap();
    let mut task = elt_engine::planner::plan(config, driver.max_identifier_len()).unwrap();
    let temp = task.config.target.options.table_tmp.clone().unwrap();

    let mut dataflow = elt_engine::dataflow_read::read_from_db(&driver, None, &task).await.unwrap();
    let outcome = elt_engine::staging::write_to_db(&driver, &mut task, &mut dataflow).await.unwrap();
    dataflow.close().await;

    assert_eq!(outcome.rows_written, 3);
    assert!(outcome.promoted);
    assert_eq!(driver.get_count("dst").await.unwrap(), 3);
    assert!(!driver.table_exists(&temp).await.unwrap(), "temp table must not survive a successful run");
}

/// Running the same full-refresh task twice does not double the final
/// table's row count (§8's idempotent-by-mode property for a fresh load
/// each time through a from-scratch final table).
#[tokio::test]
async fn truncate_mode_is_idempotent_across_repeated_runs() {
    let driver = MockDatabaseDriver::new();
    seed(&driver, "src", &[(1, "a"), (2, "b")]);

    for _ in 0..2 {
        let config = db_to_db_config(Mode::Truncate, "src", "dst").prepare().unwrap();
        let mut task = elt_engine::planner::plan(config, driver.max_identifier_len()).unwrap();
        let mut dataflow = elt_engine::dataflow_read::read_from_db(&driver, None, &task).await.unwrap();
        elt_engine::staging::write_to_db(&driver, &mut task, &mut dataflow).await.unwrap();
        dataflow.close().await;
    }

    assert_eq!(driver.get_count("dst").await.unwrap(), 2);
}

/// Upsert mode merges by primary key instead of appending duplicates.
#[tokio::test]
async fn upsert_merges_by_primary_key_without_duplicating_rows() {
    let driver = MockDatabaseDriver::new();
    seed(&driver, "src", &[(1, "a"), (2, "b")]);

    let mut config = db_to_db_config(Mode::Upsert, "src", "dst");
    config.target.primary_key = vec!["id".into()];
    config.target.update_key = Some("id".into());
    let config = config.prepare().unwrap();
    let mut task = elt_engine::planner::plan(config, driver.max_identifier_len()).unwrap();

    let mut dataflow = elt_engine::dataflow_read::read_from_db(&driver, None, &task).await.unwrap();
    elt_engine::staging::write_to_db(&driver, &mut task, &mut dataflow).await.unwrap();
    dataflow.close().await;
    assert_eq!(driver.get_count("dst").await.unwrap(), 2);

    // a second run with an overlapping id (1, filtered out by the
    // watermark) and a new one (3) should leave the final table at 3 rows,
    // not duplicate the row already present.
    seed(&driver, "src", &[(1, "a-updated"), (3, "c")]);
    let mut config2 = db_to_db_config(Mode::Upsert, "src", "dst");
    config2.target.primary_key = vec!["id".into()];
    config2.target.update_key = Some("id".into());
    let config2 = config2.prepare().unwrap();
    let mut task2 = elt_engine::planner::plan(config2, driver.max_identifier_len()).unwrap();
    let mut dataflow2 = elt_engine::dataflow_read::read_from_db(&driver, None, &task2).await.unwrap();
    elt_engine::staging::write_to_db(&driver, &mut task2, &mut dataflow2).await.unwrap();
    dataflow2.close().await;

    assert_eq!(driver.get_count("dst").await.unwrap(), 3);
}

/// A checksum divergence between the stream side and the driver's own
/// landed data is fatal when `ERROR_ON_CHECKSUM_FAILURE=1` is set (§8
/// scenario 5), and does not promote.
#[tokio::test]
async fn checksum_mismatch_is_fatal_when_flag_set() {
    let driver = MockDatabaseDriver::new();
    seed(&driver, "src", &[(1, "a"), (2, "b")]);
    driver.arm_import_corruption(0, 1, serde_json::json!("tampered"));

    let mut config = db_to_db_config(Mode::FullRefresh, "src", "dst");
    config.env.insert("ERROR_ON_CHECKSUM_FAILURE".into(), "1".into());
    let config = config.prepare().unwrap();
    let mut task = elt_engine::planner::plan(config, driver.max_identifier_len()).unwrap();
    let mut dataflow = elt_engine::dataflow_read::read_from_db(&driver, None, &task).await.unwrap();

    let err = elt_engine::staging::write_to_db(&driver, &mut task, &mut dataflow).await.unwrap_err();
    dataflow.close().await;

    assert!(matches!(err, elt_core::EltError::ChecksumMismatch { .. }), "got {err:?}");
    assert_eq!(driver.get_count("dst").await.unwrap(), 0, "a fatal checksum mismatch must not promote");
}

/// The same divergence is only a warning when the flag is unset — the run
/// still succeeds and promotes (§4.3 Phase B's non-fatal default).
#[tokio::test]
async fn checksum_mismatch_is_a_warning_when_flag_unset() {
    let driver = MockDatabaseDriver::new();
    seed(&driver, "src", &[(1, "a"), (2, "b")]);
    driver.arm_import_corruption(0, 1, serde_json::json!("tampered"));

    let config = db_to_db_config(Mode::FullRefresh, "src", "dst").prepare().unwrap();
    let mut task = elt_engine::planner::plan(config, driver.max_identifier_len()).unwrap();
    let mut dataflow = elt_engine::dataflow_read::read_from_db(&driver, None, &task).await.unwrap();

    let outcome = elt_engine::staging::write_to_db(&driver, &mut task, &mut dataflow).await.unwrap();
    dataflow.close().await;

    assert!(outcome.promoted);
    assert_eq!(driver.get_count("dst").await.unwrap(), 2);
}

/// A non-transactional dialect still promotes correctly; the BEGIN/COMMIT
/// bracket around promotion is simply skipped (§4.3 Phase C).
#[tokio::test]
async fn non_transactional_driver_still_promotes() {
    let driver = MockDatabaseDriver::new_non_transactional();
    seed(&driver, "src", &[(1, "a")]);

    let config = db_to_db_config(Mode::FullRefresh, "src", "dst").prepare().unwrap();
    let mut task = elt_engine::planner::plan(config, driver.max_identifier_len()).unwrap();
    let mut dataflow = elt_engine::dataflow_read::read_from_db(&driver, None, &task).await.unwrap();
    let outcome = elt_engine::staging::write_to_db(&driver, &mut task, &mut dataflow).await.unwrap();
    dataflow.close().await;

    assert!(outcome.promoted);
    assert_eq!(driver.get_count("dst").await.unwrap(), 1);
}

/// The full executor, not just `staging::write_to_db` directly, produces
/// the same end-to-end result for a DB->DB full-refresh task.
#[tokio::test]
async fn executor_runs_db_to_db_task_to_completion() {
    let driver = std::sync::Arc::new(MockDatabaseDriver::new());
    seed(&driver, "src", &[(1, "a"), (2, "b")]);

    let mut registry = elt_core::DriverRegistry::new();
    registry.register_database("mock_db", driver.clone());

    let config = db_to_db_config(Mode::FullRefresh, "src", "dst").prepare().unwrap();
    let mut task = elt_engine::planner::plan(config, driver.max_identifier_len()).unwrap();

    let executor = elt_engine::Executor::new(registry);
    let outcome = executor.run(&mut task).await.unwrap();

    match outcome {
        elt_engine::ExecutionOutcome::Staged { rows_written, promoted } => {
            assert_eq!(rows_written, 2);
            assert!(promoted);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(driver.get_count("dst").await.unwrap(), 2);
}
