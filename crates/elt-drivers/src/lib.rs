//! # elt-drivers
//!
//! Concrete `DatabaseDriver` and `FilesystemDriver` implementations.
//! Real dialect wire protocols are out of scope (§1 of the task
//! specification) — this crate ships the mock/local drivers that exercise
//! the planner, dataflow, and staging & promotion protocol in tests and
//! local development, plus a local-disk CSV filesystem driver.

pub mod local_fs;
pub mod mock_db;

pub use local_fs::LocalFilesystemDriver;
pub use mock_db::MockDatabaseDriver;
