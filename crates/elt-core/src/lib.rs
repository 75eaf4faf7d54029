//! # elt-core
//!
//! Core data model, error types, and driver traits for the `elt-rs` ELT
//! engine: a general-purpose Extract-Load-Transform engine that moves
//! tabular data between heterogeneous endpoints under a single declarative
//! task specification.
//!
//! ## Key components
//!
//! - **Config / Task**: the declarative task specification and its runtime
//!   wrapper (lifecycle, status, progress, stall detection).
//! - **Dataflow / Datastream**: the lazy, pull-based streaming row model
//!   that every topology reads through and writes through.
//! - **Column / ColumnType**: dialect-neutral column typing, used for
//!   schema inference, cross-dialect mapping, and checksum comparison.
//! - **DatabaseDriver / FilesystemDriver / DriverRegistry**: the
//!   capability-bearing collaborator traits; concrete drivers live in
//!   `elt-drivers`.
//!
//! ## Example
//!
//! ```rust
//! use elt_core::config::Config;
//!
//! let yaml = r#"
//! src_conn:
//!   type: postgres
//!   url: postgres://localhost/src
//! source:
//!   stream: public.t1k
//! tgt_conn:
//!   type: mock_db
//!   url: mock://tgt
//! target:
//!   object: public.t1k
//! mode: full-refresh
//! "#;
//! let cfg = Config::from_str_auto(yaml).unwrap().prepare().unwrap();
//! assert_eq!(cfg.target.object, "public.t1k");
//! ```

pub mod checksum;
pub mod column;
pub mod config;
pub mod dataflow;
pub mod driver;
pub mod env;
pub mod error;
pub mod rowconv;
pub mod task;
pub mod telemetry;

pub use checksum::checksums_for_columns;
pub use column::{Column, ColumnType};
pub use config::{Config, ConnInfo, Mode, RunOptions, SourceSpec, TargetOptions, TargetSpec};
pub use dataflow::{Batch, BatchRx, BatchTx, Dataflow, Datastream, Message};
pub use driver::{DatabaseDriver, DriverRegistry, FilesystemDriver};
pub use error::{EltError, Result};
pub use rowconv::{batch_to_rows, rows_to_batch};
pub use task::{ProgressPhase, Task, TaskStatus, Topology};
