//! Task Executor (§4.6): dispatches a planned `Task` to its topology-specific
//! routine, owning lifecycle, progress, stall detection, and cancellation.

use crate::discovery::{discover_filesystem, DiscoverOptions, DiscoverResult};
use crate::{dataflow_read, staging};
use elt_core::{DriverRegistry, EltError, Mode, Result, Task, TaskStatus, Topology};
use std::time::Duration;
use tokio::time::interval;

/// Heartbeat period for the progress ticker (§5's "1-second ticker").
/// Recommended stall window for callers polling `Task::is_stalled` between
/// phases is 30s; the ticker itself only logs a heartbeat, since racing it
/// against `dispatch` for direct access to `Task` would require holding both
/// a shared and an exclusive borrow at once.
const TICK_PERIOD: Duration = Duration::from_secs(1);
/// Grace period the executor waits for a cancelled worker to return before
/// forcing `Interrupted` (§5).
const CANCEL_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Staged { rows_written: u64, promoted: bool },
    FileWritten { bytes: u64 },
    Discovered(DiscoverResultOwned),
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverResultOwned {
    pub files: Vec<String>,
    pub table_count: usize,
}

impl From<DiscoverResult> for DiscoverResultOwned {
    fn from(r: DiscoverResult) -> Self {
        Self { files: r.files, table_count: r.schemata.len() }
    }
}

pub struct Executor {
    registry: DriverRegistry,
}

impl Executor {
    pub fn new(registry: DriverRegistry) -> Self {
        Self { registry }
    }

    /// Runs `task` to completion, updating its status/progress in place.
    /// Runs a detached heartbeat alongside the work future so long phases
    /// still produce periodic log output, then joins it once `dispatch`
    /// resolves.
    pub async fn run(&self, task: &mut Task) -> Result<ExecutionOutcome> {
        task.start();
        let cancel = task.cancel.clone();
        let topology = task.topology;
        let heartbeat = tokio::spawn(async move {
            let mut tick = interval(TICK_PERIOD);
            loop {
                tick.tick().await;
                if cancel.is_cancelled() {
                    return;
                }
                tracing::debug!(task_topology = %topology, "progress heartbeat");
            }
        });

        let outcome = with_cancellation_grace(task.cancel.clone(), self.dispatch(task)).await;
        heartbeat.abort();

        match &outcome {
            Ok(_) => task.finish(TaskStatus::Success, None),
            Err(e) => task.finish(TaskStatus::Error, Some(e.to_string())),
        }
        outcome
    }

    async fn dispatch(&self, task: &mut Task) -> Result<ExecutionOutcome> {
        if task.config.mode == Mode::Discover {
            return self.run_discover(task).await;
        }

        match task.topology {
            Topology::DbToDb | Topology::ApiToDb => self.run_to_db(task).await,
            Topology::FileToDb => self.run_file_to_db(task).await,
            Topology::DbToFile | Topology::ApiToFile => self.run_to_file(task).await,
            Topology::FileToFile => self.run_file_to_file(task).await,
            Topology::DbSql | Topology::DbTransform => self.run_db_sql(task).await,
        }
    }

    async fn run_to_db(&self, task: &mut Task) -> Result<ExecutionOutcome> {
        let src = self.registry.database(&task.config.src_conn.type_tag)?;
        let tgt = self.registry.database(&task.config.tgt_conn.type_tag)?;
        task.set_progress("reading source");
        let mut dataflow = dataflow_read::read_from_db(src.as_ref(), Some(tgt.as_ref()), task).await?;
        let outcome = staging::write_to_db(tgt.as_ref(), task, &mut dataflow).await?;
        dataflow.close().await;
        Ok(ExecutionOutcome::Staged { rows_written: outcome.rows_written, promoted: outcome.promoted })
    }

    async fn run_file_to_db(&self, task: &mut Task) -> Result<ExecutionOutcome> {
        let src = self.registry.filesystem(&task.config.src_conn.type_tag)?;
        let tgt = self.registry.database(&task.config.tgt_conn.type_tag)?;
        task.set_progress("reading source file");
        let mut dataflow = dataflow_read::read_from_file(src.as_ref(), task).await?;
        let outcome = staging::write_to_db(tgt.as_ref(), task, &mut dataflow).await?;
        dataflow.close().await;
        Ok(ExecutionOutcome::Staged { rows_written: outcome.rows_written, promoted: outcome.promoted })
    }

    async fn run_to_file(&self, task: &mut Task) -> Result<ExecutionOutcome> {
        let src = self.registry.database(&task.config.src_conn.type_tag)?;
        let tgt = self.registry.filesystem(&task.config.tgt_conn.type_tag)?;
        task.set_progress("reading source");
        let mut dataflow = dataflow_read::read_from_db(src.as_ref(), None, task).await?;
        task.set_progress(format!("writing to {}", task.config.target.object));
        let bytes = tgt.write_dataflow(&task.config.target.object, &mut dataflow).await?;
        dataflow.close().await;
        Ok(ExecutionOutcome::FileWritten { bytes })
    }

    async fn run_file_to_file(&self, task: &mut Task) -> Result<ExecutionOutcome> {
        let src = self.registry.filesystem(&task.config.src_conn.type_tag)?;
        let tgt = self.registry.filesystem(&task.config.tgt_conn.type_tag)?;
        task.set_progress("reading source file");
        let mut dataflow = dataflow_read::read_from_file(src.as_ref(), task).await?;
        task.set_progress(format!("writing to {}", task.config.target.object));
        let bytes = tgt.write_dataflow(&task.config.target.object, &mut dataflow).await?;
        dataflow.close().await;
        Ok(ExecutionOutcome::FileWritten { bytes })
    }

    /// `DB-SQL`/`DB-Transform`: no row transfer, just PostSQL (or a
    /// transform directive, whose execution is the out-of-scope transform
    /// runner collaborator — only its SQL-equivalent hook is invoked here).
    async fn run_db_sql(&self, task: &mut Task) -> Result<ExecutionOutcome> {
        let tgt = self.registry.database(&task.config.tgt_conn.type_tag)?;
        if let Some(sql) = task.config.target.options.post_sql.clone() {
            task.set_progress("running post_sql");
            tgt.execute(&sql).await?;
        }
        if let Some(directive) = task.config.target.options.transform.clone() {
            task.set_progress(format!("running transform: {directive}"));
            tgt.execute(&directive).await?;
        }
        Ok(ExecutionOutcome::Staged { rows_written: 0, promoted: false })
    }

    async fn run_discover(&self, task: &mut Task) -> Result<ExecutionOutcome> {
        let opts = DiscoverOptions::default();
        if task.config.tgt_conn.is_filesystem() {
            let tgt = self.registry.filesystem(&task.config.tgt_conn.type_tag)?;
            let result = discover_filesystem(tgt.as_ref(), &task.config.target.object, &opts).await?;
            return Ok(ExecutionOutcome::Discovered(result.into()));
        }
        Err(EltError::InvalidConfig(
            "discover mode against a database target requires a caller-supplied table list (see discovery::discover_database)".into(),
        ))
    }
}

/// Waits for cancellation to actually stop `work`, forcing `Interrupted`
/// after `CANCEL_GRACE` if the worker hasn't returned (§5). Exposed
/// separately from `Executor::run` so callers that already hold a future
/// (e.g. a spawned worker's `JoinHandle`) can apply the same grace-period
/// policy.
pub async fn with_cancellation_grace<F, T>(cancel: tokio_util::sync::CancellationToken, work: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::pin!(work);
    tokio::select! {
        biased;
        result = &mut work => result,
        _ = cancel.cancelled() => {
            tokio::select! {
                result = &mut work => result,
                _ = tokio::time::sleep(CANCEL_GRACE) => Err(EltError::Interrupted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elt_core::{Column, ColumnType, ConnInfo, Config, RunOptions, SourceSpec, TargetSpec};
    use elt_drivers::MockDatabaseDriver;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn registry_with_mock() -> (DriverRegistry, Arc<MockDatabaseDriver>) {
        let driver = Arc::new(MockDatabaseDriver::new());
        let mut registry = DriverRegistry::new();
        registry.register_database("mock_db", driver.clone());
        (registry, driver)
    }

    fn db_to_db_config() -> Config {
        Config {
            src_conn: ConnInfo { type_tag: "mock_db".into(), url: String::new(), credentials: HashMap::new() },
            source: SourceSpec { stream: "src_table".into(), ..Default::default() },
            tgt_conn: ConnInfo { type_tag: "mock_db".into(), url: String::new(), credentials: HashMap::new() },
            target: TargetSpec { object: "final_table".into(), ..Default::default() },
            mode: elt_core::Mode::FullRefresh,
            options: RunOptions::default(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn db_to_db_full_refresh_end_to_end() {
        let (registry, driver) = registry_with_mock();
        let columns = vec![Column::new("id", ColumnType::Integer, false)];
        let rows = vec![vec![serde_json::json!(1)], vec![serde_json::json!(2)]];
        let batch = elt_core::rows_to_batch(&columns, &rows).unwrap();
        driver.seed("src_table", columns, &batch);

        let mut task = crate::planner::plan(db_to_db_config(), driver.max_identifier_len()).unwrap();
        let executor = Executor::new(registry);
        let outcome = executor.run(&mut task).await.unwrap();
        match outcome {
            ExecutionOutcome::Staged { rows_written, promoted } => {
                assert_eq!(rows_written, 2);
                assert!(promoted);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(driver.get_count("final_table").await.unwrap(), 2);
    }
}
