//! # elt-engine
//!
//! Planner, read path, staging & promotion protocol, watermark resolver,
//! discovery, and task executor for the `elt-rs` ELT engine. Built entirely
//! against `elt-core`'s `DatabaseDriver`/`FilesystemDriver` traits; no
//! concrete driver is depended on outside of tests (`elt-drivers`' mocks).
//!
//! ## Flow
//!
//! 1. [`planner::plan`] classifies a prepared `Config` into a `Task`.
//! 2. [`dataflow_read::read_from_db`] / [`dataflow_read::read_from_file`]
//!    open the source as a `Dataflow`.
//! 3. [`staging::write_to_db`] runs the staging & promotion protocol against
//!    the target.
//! 4. [`executor::Executor`] ties the above together per topology, owning
//!    task lifecycle, progress, and cancellation.

pub mod dataflow_read;
pub mod discovery;
pub mod executor;
pub mod planner;
pub mod staging;
pub mod types;
pub mod watermark;

pub use executor::{ExecutionOutcome, Executor};
pub use staging::StagingOutcome;
pub use watermark::Watermark;
