//! Staging & Promotion Protocol (§4.3) — `WriteToDb`. Loads a Dataflow into
//! a temp object, validates row counts and checksums, then atomically
//! promotes under the task's mode. This is the core of the core.

use crate::types::infer_columns;
use elt_core::{Column, DatabaseDriver, Dataflow, EltError, Mode, ProgressPhase, Result, Task};

/// Outcome of a successful `write_to_db` call.
#[derive(Debug, Clone, Copy)]
pub struct StagingOutcome {
    pub rows_written: u64,
    /// False for the `cnt == 0` "nothing to do" case (§4.3 Phase C).
    pub promoted: bool,
}

/// Runs Phases A/B/C of the staging protocol against `driver`, mutating
/// `task`'s progress/phase as it goes. The temp object is guaranteed
/// dropped on every exit path, success or failure (§3's `TempObject`
/// invariant, §8's "no temp table remains" property).
pub async fn write_to_db(
    driver: &dyn DatabaseDriver,
    task: &mut Task,
    dataflow: &mut Dataflow,
) -> Result<StagingOutcome> {
    let temp = task
        .config
        .target
        .options
        .table_tmp
        .clone()
        .unwrap_or_else(|| crate::planner::reserve_temp_name(&task.config.target.object, driver.max_identifier_len()));

    let outcome = run_phases(driver, task, dataflow, &temp).await;

    if let Err(e) = driver.drop_table(&temp).await {
        tracing::warn!(temp, error = %e, "best-effort temp table drop failed");
    }

    outcome
}

async fn run_phases(
    driver: &dyn DatabaseDriver,
    task: &mut Task,
    dataflow: &mut Dataflow,
    temp: &str,
) -> Result<StagingOutcome> {
    phase_a_preflight(driver, task, dataflow, temp).await?;
    let (cnt, columns) = phase_b_load(driver, task, dataflow, temp).await?;
    phase_c_promote(driver, task, temp, cnt, &columns).await
}

/// Phase A — Pre-flight: run PreSQL, drop any leaked temp table, infer
/// schema from the leading buffer, create the temp table.
async fn phase_a_preflight(
    driver: &dyn DatabaseDriver,
    task: &mut Task,
    dataflow: &mut Dataflow,
    temp: &str,
) -> Result<()> {
    task.enter_phase(ProgressPhase::PreSql);
    if let Some(pre_sql) = &task.config.target.options.pre_sql {
        task.set_progress(format!("running pre_sql for {temp}"));
        driver.execute(pre_sql).await?;
    }
    task.enter_phase(ProgressPhase::Normal);

    // Drop a temp table that leaked from a prior run; a missing table here
    // is not an error.
    let _ = driver.drop_table(temp).await;

    dataflow.fill_leading_buffers().await;
    // A Dataflow constructed with a known column list (the common case:
    // the read path already resolved source columns) keeps it; otherwise
    // infer from the leading buffer captured above.
    let columns = if !dataflow.columns().is_empty() {
        dataflow.columns().to_vec()
    } else {
        let buffer: Vec<elt_core::Batch> =
            dataflow.streams_mut().iter().flat_map(|s| s.leading_buffer().to_vec()).collect();
        infer_columns(&buffer)?
    };
    if columns.is_empty() {
        return Err(EltError::EmptySchema);
    }
    dataflow.set_columns(columns.clone());

    let ddl = match &task.config.target.options.table_ddl {
        Some(user_ddl) => user_ddl.clone(),
        None => driver.generate_ddl(temp, &columns)?,
    };
    task.set_progress(format!("creating temp table {temp}"));
    driver.execute(&ddl).await?;
    task.config.target.tmp_table_created = true;
    Ok(())
}

/// Phase B — Load: bulk import (or direct copy) rows into the temp table,
/// verify `cnt == tCnt`, sync stats, compare checksums.
async fn phase_b_load(
    driver: &dyn DatabaseDriver,
    task: &mut Task,
    dataflow: &mut Dataflow,
    temp: &str,
) -> Result<(u64, Vec<Column>)> {
    let columns = dataflow.columns().to_vec();
    task.set_progress(format!("loading into {temp}"));

    dataflow.check_cancelled()?;
    let cnt = driver.bulk_import_flow(temp, dataflow).await?;
    dataflow.mark_drained();

    let t_cnt = driver.get_count(temp).await?;
    if cnt != t_cnt {
        return Err(EltError::RowCountMismatch { sent: cnt, counted: t_cnt });
    }

    dataflow.sync_stats();

    let stream_checksums = dataflow.checksums();
    let mismatched = driver.compare_checksums(temp, &columns, &stream_checksums).await?;
    if !mismatched.is_empty() {
        let fatal = elt_core::env::checksum_failure_is_fatal(&task.config.env);
        if fatal {
            return Err(EltError::ChecksumMismatch { column: mismatched.join(", ") });
        }
        tracing::warn!(columns = ?mismatched, "checksum mismatch ignored (ERROR_ON_CHECKSUM_FAILURE not set)");
    }

    Ok((cnt, columns))
}

/// Phase C — Promotion, inside a transaction when the driver supports one.
async fn phase_c_promote(
    driver: &dyn DatabaseDriver,
    task: &mut Task,
    temp: &str,
    cnt: u64,
    columns: &[Column],
) -> Result<StagingOutcome> {
    if cnt == 0 {
        task.set_progress("nothing to do: 0 rows loaded");
        return Ok(StagingOutcome { rows_written: 0, promoted: false });
    }

    let finale = task.config.target.object.clone();
    let mode = task.config.mode;
    let transactional = driver.supports_transactions();

    if transactional {
        driver.execute("BEGIN").await?;
    }

    let result = promote_inner(driver, task, temp, &finale, mode, columns).await;

    match (&result, transactional) {
        (Ok(_), true) => {
            driver.execute("COMMIT").await?;
        }
        (Err(_), true) => {
            let _ = driver.execute("ROLLBACK").await;
        }
        _ => {}
    }

    result.map(|_| StagingOutcome { rows_written: cnt, promoted: true })
}

async fn promote_inner(
    driver: &dyn DatabaseDriver,
    task: &mut Task,
    temp: &str,
    finale: &str,
    mode: Mode,
    columns: &[Column],
) -> Result<()> {
    if mode == Mode::Drop {
        let _ = driver.drop_table(finale).await;
    }
    if !driver.table_exists(finale).await? {
        let ddl = match &task.config.target.options.table_ddl {
            Some(user_ddl) => user_ddl.clone(),
            None => driver.generate_ddl(finale, columns)?,
        };
        driver.execute(&ddl).await?;
    } else if task.config.target.options.adjust_column_type {
        driver.optimize_table(finale, columns).await?;
    }

    match mode {
        Mode::Append | Mode::Drop | Mode::FullRefresh | Mode::Snapshot => {
            driver.execute(&insert_select_sql(driver, temp, finale, columns)).await?;
        }
        Mode::Truncate => {
            driver.execute(&format!("TRUNCATE {}", driver.quote_ident(finale))).await?;
            driver.execute(&insert_select_sql(driver, temp, finale, columns)).await?;
        }
        Mode::Upsert => {
            let pk = task.config.target.primary_key.clone();
            driver.upsert(temp, finale, &pk).await?;
        }
        Mode::Discover => {}
    }

    if let Some(post_sql) = task.config.target.options.post_sql.clone() {
        task.enter_phase(ProgressPhase::PostSql);
        let resolved = resolve_drop_view_placeholder(driver, &post_sql, finale);
        driver.execute(&resolved).await?;
        task.enter_phase(ProgressPhase::Normal);
    }

    Ok(())
}

/// Builds `INSERT INTO final (tgtFields) SELECT castSrcFields FROM temp`
/// (§4.3 Phase C's append/drop/truncate promotion SQL).
fn insert_select_sql(driver: &dyn DatabaseDriver, temp: &str, finale: &str, columns: &[Column]) -> String {
    let fields: Vec<String> = columns.iter().map(|c| driver.quote_ident(&c.name)).collect();
    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        driver.quote_ident(finale),
        fields.join(", "),
        fields.join(", "),
        driver.quote_ident(temp)
    )
}

/// Substitutes `{drop_view}` in Pre/PostSQL with the dialect's `DROP VIEW`
/// against the conventional `<final>_vw` name (§4.3 Phase C).
fn resolve_drop_view_placeholder(driver: &dyn DatabaseDriver, sql: &str, finale: &str) -> String {
    if !sql.contains("{drop_view}") {
        return sql.to_string();
    }
    let view_name = format!("{finale}_vw");
    let drop_view_sql = format!("DROP VIEW IF EXISTS {}", driver.quote_ident(&view_name));
    sql.replace("{drop_view}", &drop_view_sql)
}
