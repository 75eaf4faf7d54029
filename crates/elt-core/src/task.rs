//! Task (§3): owns a `Config`, a classification tag (the topology), status,
//! timestamps, a `Dataflow`, a cancellation context, a progress log, and the
//! counters used for stall detection (§4.6).

use crate::config::Config;
use crate::dataflow::Dataflow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The classification a `Config` is reduced to by the planner (§2, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    DbToDb,
    DbToFile,
    FileToDb,
    FileToFile,
    ApiToDb,
    ApiToFile,
    DbSql,
    DbTransform,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Topology::DbToDb => "DB->DB",
            Topology::DbToFile => "DB->File",
            Topology::FileToDb => "File->DB",
            Topology::FileToFile => "File->File",
            Topology::ApiToDb => "API->DB",
            Topology::ApiToFile => "API->File",
            Topology::DbSql => "DB-SQL",
            Topology::DbTransform => "DB-Transform",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Created,
    Running,
    Success,
    Error,
}

/// Phases during which a long pause is expected and stall detection should
/// not fire (§4.6's `IsStalled`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Normal,
    PreSql,
    PostSql,
}

/// Owns a `Config`, a topology tag, lifecycle status, and the counters used
/// for stall detection and rate computation. Mutated only by the executor
/// thread and any stats task it spawns; exclusively owns its `Dataflow`.
pub struct Task {
    pub config: Config,
    pub topology: Topology,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub dataflow: Option<Dataflow>,
    pub cancel: CancellationToken,
    pub progress: String,
    pub progress_hist: Vec<String>,
    pub phase: ProgressPhase,
    pub error: Option<String>,

    prev_count: u64,
    last_increment: Instant,
}

impl Task {
    pub fn new(config: Config, topology: Topology) -> Self {
        Self {
            config,
            topology,
            status: TaskStatus::Created,
            started_at: None,
            ended_at: None,
            dataflow: None,
            cancel: CancellationToken::new(),
            progress: String::new(),
            progress_hist: Vec::new(),
            phase: ProgressPhase::Normal,
            error: None,
            prev_count: 0,
            last_increment: Instant::now(),
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.last_increment = Instant::now();
    }

    pub fn set_progress(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::info!(task_topology = %self.topology, "{msg}");
        self.progress_hist.push(msg.clone());
        self.progress = msg;
    }

    pub fn enter_phase(&mut self, phase: ProgressPhase) {
        self.phase = phase;
    }

    pub fn finish(&mut self, status: TaskStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.ended_at = Some(Utc::now());
    }

    /// Current row count of the task's dataflow, or 0 before one exists.
    pub fn count(&self) -> u64 {
        self.dataflow.as_ref().map(Dataflow::count).unwrap_or(0)
    }

    /// Call periodically (e.g. from the 1s progress ticker, §5) to refresh
    /// the stall-detection clock whenever the row count has advanced.
    pub fn sample(&mut self) {
        let now_count = self.count();
        if now_count > self.prev_count {
            self.prev_count = now_count;
            self.last_increment = Instant::now();
        }
    }

    /// True when no row-count progress has been observed within `window`
    /// and the task isn't in a known long-pause phase (§4.6).
    pub fn is_stalled(&self, window: std::time::Duration) -> bool {
        if matches!(self.phase, ProgressPhase::PreSql | ProgressPhase::PostSql) {
            return false;
        }
        if self.status != TaskStatus::Running {
            return false;
        }
        self.last_increment.elapsed() > window
    }

    /// Windowed rows/sec: `(count() - prevCount at window start) / window`.
    /// Returns 0 before the task has started producing rows.
    pub fn rate(&self, window: std::time::Duration) -> f64 {
        if self.status != TaskStatus::Running || window.is_zero() {
            return 0.0;
        }
        let now_count = self.count();
        if now_count <= self.prev_count {
            return 0.0;
        }
        (now_count - self.prev_count) as f64 / window.as_secs_f64()
    }
}
