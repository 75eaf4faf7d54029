//! Driver Registry (§2.1, §9.1): maps a connection type tag to a capability
//! bundle. Drivers themselves — per-dialect SQL rendering, per-driver
//! connection code — are out of scope (§1); only the trait surface and the
//! registry that resolves a tag to an instance live in core.

use crate::column::Column;
use crate::dataflow::{Batch, Dataflow};
use crate::error::{EltError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability bundle for a relational/warehouse target or source (§2.1).
///
/// Every method maps directly to a verb used by the planner, the read path,
/// or the staging protocol. Implementations are opaque collaborators from
/// the spec's point of view — `elt-drivers` ships a couple of concrete ones
/// used for tests and local development.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// The dialect tag this driver was registered under (`postgres`, ...).
    fn dialect(&self) -> &str;

    /// Executes `sql` and returns the resulting rows as a single batch.
    /// Used for watermark queries, zero-row shape probes, and count checks.
    async fn query(&self, sql: &str) -> Result<Batch>;

    /// Executes `sql` for side effects only (DDL, PreSQL/PostSQL, TRUNCATE).
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Streams `dataflow`'s rows out starting from a source table/SQL.
    /// Returns a fresh `Dataflow` whose Datastreams pull from this driver.
    async fn bulk_export_flow(&self, sql: &str, columns: &[Column]) -> Result<Dataflow>;

    /// Streams rows from `dataflow` into `table`. Returns the number of
    /// rows sent (`cnt` in §4.3 Phase B).
    async fn bulk_import_flow(&self, table: &str, dataflow: &mut Dataflow) -> Result<u64>;

    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Renders `CREATE TABLE` DDL for `table` from the given columns,
    /// either from a user-provided `TableDDL` template or by inference.
    fn generate_ddl(&self, table: &str, columns: &[Column]) -> Result<String>;

    async fn get_columns(&self, table: &str) -> Result<Vec<Column>>;

    async fn get_count(&self, table: &str) -> Result<u64>;

    /// True when `table` exists; distinguishes "empty watermark because
    /// table missing" from a real query failure (§4.4).
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Compares driver-computed per-column checksums on `table` against
    /// the caller-supplied stream-computed ones. Returns the names of any
    /// columns that disagree.
    async fn compare_checksums(
        &self,
        table: &str,
        columns: &[Column],
        stream_checksums: &HashMap<String, u64>,
    ) -> Result<Vec<String>>;

    /// `MERGE`/`ON CONFLICT`-style upsert of `temp` into `final` keyed by
    /// `primary_key`, or a delete-then-insert fallback. Returns affected
    /// row count.
    async fn upsert(&self, temp: &str, finale: &str, primary_key: &[String]) -> Result<u64>;

    /// Atomic rename of `temp` to `finale` (the `swap` promotion variant).
    async fn swap_table(&self, temp: &str, finale: &str) -> Result<()>;

    /// Widens `finale`'s column types as needed to accept `columns`
    /// (Phase C's `OptimizeTable`).
    async fn optimize_table(&self, _finale: &str, _columns: &[Column]) -> Result<()> {
        Ok(())
    }

    /// Resolves a named SQL template for this dialect (limit clauses,
    /// quoting, cast expressions). `elt-drivers`' mock implementation
    /// returns a fixed, simple set.
    fn template_lookup(&self, name: &str) -> Option<String>;

    /// Whether this driver supports a transactional promotion phase; some
    /// dialects (e.g. warehouse-style analytic engines) run promotion
    /// outside a transaction (§4.3 Phase C).
    fn supports_transactions(&self) -> bool {
        true
    }

    /// Whether this driver can ingest directly from a filesystem URL,
    /// bypassing the process's row pipe (§4.3 Phase B, "direct copy").
    /// Default: unsupported, which is not an error (`DirectCopyUnsupported`).
    async fn copy_direct(&self, _table: &str, _src_url: &str, _credentials: &HashMap<String, String>) -> Result<u64> {
        Err(EltError::DirectCopyUnsupported)
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Maximum identifier length for this dialect, used when the planner
    /// truncates a generated temp-table base name (§4.1).
    fn max_identifier_len(&self) -> usize {
        63
    }
}

/// Capability bundle for a document-store / object-store / local
/// filesystem endpoint (§2.1).
#[async_trait]
pub trait FilesystemDriver: Send + Sync {
    fn scheme(&self) -> &str;

    /// Opens `url` (file, glob, or prefix) as a `Dataflow`, inferring
    /// format/compression/delimiter from extension and driver options.
    async fn read_dataflow(&self, url: &str, columns_hint: &[Column]) -> Result<Dataflow>;

    /// Writes `dataflow`'s rows to `url`. Returns bytes written.
    async fn write_dataflow(&self, url: &str, dataflow: &mut Dataflow) -> Result<u64>;

    /// Lists object paths under `prefix`. Paths must never contain `//`
    /// after the scheme (§4.5).
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

enum DriverEntry {
    Database(Arc<dyn DatabaseDriver>),
    Filesystem(Arc<dyn FilesystemDriver>),
}

/// Maps a connection type tag to a constructed driver instance (§2.1).
/// Registration is explicit; there is no global/ambient mutable state (§5).
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, DriverEntry>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_database(&mut self, type_tag: impl Into<String>, driver: Arc<dyn DatabaseDriver>) {
        self.drivers.insert(type_tag.into(), DriverEntry::Database(driver));
    }

    pub fn register_filesystem(&mut self, type_tag: impl Into<String>, driver: Arc<dyn FilesystemDriver>) {
        self.drivers.insert(type_tag.into(), DriverEntry::Filesystem(driver));
    }

    pub fn database(&self, type_tag: &str) -> Result<Arc<dyn DatabaseDriver>> {
        match self.drivers.get(type_tag) {
            Some(DriverEntry::Database(d)) => Ok(d.clone()),
            Some(DriverEntry::Filesystem(_)) => Err(EltError::InvalidConfig(format!(
                "`{type_tag}` is registered as a filesystem driver, not a database driver"
            ))),
            None => Err(EltError::InvalidConfig(format!("no driver registered for `{type_tag}`"))),
        }
    }

    pub fn filesystem(&self, type_tag: &str) -> Result<Arc<dyn FilesystemDriver>> {
        match self.drivers.get(type_tag) {
            Some(DriverEntry::Filesystem(d)) => Ok(d.clone()),
            Some(DriverEntry::Database(_)) => Err(EltError::InvalidConfig(format!(
                "`{type_tag}` is registered as a database driver, not a filesystem driver"
            ))),
            None => Err(EltError::InvalidConfig(format!("no driver registered for `{type_tag}`"))),
        }
    }
}
