//! A fully in-memory `DatabaseDriver` used for tests and local development.
//!
//! Real dialect drivers (Postgres/MySQL/Snowflake wire protocols and SQL
//! templating) are out of scope per spec.md §1 — this driver exists so the
//! staging & promotion protocol, the planner, and the watermark resolver
//! can be exercised end to end (§8's testable properties) without standing
//! up a real database.

use async_trait::async_trait;
use elt_core::dataflow::{Batch, Dataflow, Datastream, Message};
use elt_core::rowconv::{batch_to_rows, rows_to_batch};
use elt_core::{Column, ColumnType, DatabaseDriver, EltError, Result};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct MockTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Json>>,
}

/// An in-memory table store addressed by lowercased table name, mimicking a
/// case-insensitive dialect.
pub struct MockDatabaseDriver {
    tables: Mutex<HashMap<String, MockTable>>,
    supports_tx: bool,
    /// One-shot row/column/value corruption applied at the end of the next
    /// `bulk_import_flow`, simulating a dialect's bulk loader silently
    /// mangling a cell (truncation, a lossy cast) so `CompareChecksums` has
    /// a real divergence to catch. Armed by `arm_import_corruption`, tests
    /// only.
    pending_corruption: Mutex<Option<(usize, usize, Json)>>,
}

impl Default for MockDatabaseDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDatabaseDriver {
    pub fn new() -> Self {
        Self { tables: Mutex::new(HashMap::new()), supports_tx: true, pending_corruption: Mutex::new(None) }
    }

    /// Constructs a driver for a dialect that disallows transactional
    /// promotion (§4.3 Phase C, "`{}` for dialects that disallow it").
    pub fn new_non_transactional() -> Self {
        Self { tables: Mutex::new(HashMap::new()), supports_tx: false, pending_corruption: Mutex::new(None) }
    }

    /// Arms a one-shot corruption of `(row, col)` in whichever table the
    /// next `bulk_import_flow` call loads into, to `value`. Test-only.
    pub fn arm_import_corruption(&self, row: usize, col: usize, value: Json) {
        *self.pending_corruption.lock().unwrap() = Some((row, col, value));
    }

    fn key(table: &str) -> String {
        table.to_lowercase()
    }

    /// Seeds a table directly, bypassing SQL — used by tests to set up
    /// source fixtures.
    pub fn seed(&self, table: &str, columns: Vec<Column>, batch: &Batch) {
        let rows = batch_to_rows(batch, &columns);
        self.tables
            .lock()
            .unwrap()
            .insert(Self::key(table), MockTable { columns, rows });
    }

    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables.lock().unwrap().get(&Self::key(table)).map(|t| t.rows.len())
    }

    /// Interprets `INSERT INTO finale (...) SELECT ... FROM temp`: copies
    /// `temp`'s rows into `finale`, aligning columns by normalized name so a
    /// `finale` with a different column order still receives the right
    /// values (§4.3 Phase C's `castSrcFields`/`tgtFields` alignment).
    fn insert_select(&self, finale: &str, temp: &str) -> Result<u64> {
        let mut tables = self.tables.lock().unwrap();
        let Some(source) = tables.get(&Self::key(temp)) else {
            return Err(EltError::Other(anyhow::anyhow!("temp table missing: {temp}")));
        };
        let (src_columns, src_rows) = (source.columns.clone(), source.rows.clone());

        let entry = tables
            .entry(Self::key(finale))
            .or_insert_with(|| MockTable { columns: src_columns.clone(), rows: Vec::new() });
        let idx_map: Vec<Option<usize>> = entry
            .columns
            .iter()
            .map(|c| src_columns.iter().position(|sc| sc.normalized_name() == c.normalized_name()))
            .collect();

        let n = src_rows.len() as u64;
        for row in src_rows {
            let mapped = idx_map
                .iter()
                .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or(Json::Null))
                .collect();
            entry.rows.push(mapped);
        }
        Ok(n)
    }
}

#[async_trait]
impl DatabaseDriver for MockDatabaseDriver {
    fn dialect(&self) -> &str {
        "mock_db"
    }

    async fn query(&self, sql: &str) -> Result<Batch> {
        let sql_lower = sql.to_lowercase();
        if let Some(caps) = WATERMARK_RE.captures(&sql_lower) {
            let col = caps.get(1).unwrap().as_str();
            let table = caps.get(2).unwrap().as_str();
            let tables = self.tables.lock().unwrap();
            let Some(t) = tables.get(&Self::key(table)) else {
                return Err(EltError::Other(anyhow::anyhow!("table does not exist: {table}")));
            };
            let idx = t
                .columns
                .iter()
                .position(|c| c.normalized_name() == col)
                .ok_or_else(|| EltError::Other(anyhow::anyhow!("unknown column {col}")))?;
            let max = t.rows.iter().filter_map(|r| r.get(idx).cloned()).max_by(json_cmp);
            let out_col = vec![Column::new(col, t.columns[idx].col_type, true)];
            let rows = vec![vec![max.unwrap_or(Json::Null)]];
            return Ok(rows_to_batch(&out_col, &rows)?);
        }
        Err(EltError::Other(anyhow::anyhow!("mock driver cannot interpret query: {sql}")))
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let sql_lower = sql.to_lowercase();

        if let Some(caps) = INSERT_SELECT_RE.captures(&sql_lower) {
            let finale = caps.get(1).unwrap().as_str().trim_matches('"');
            let temp = caps.get(2).unwrap().as_str().trim_matches('"');
            return self.insert_select(finale, temp);
        }

        if let Some(caps) = regex::Regex::new(r"^truncate\s+(?:table\s+)?\"?(\S+?)\"?$").unwrap().captures(&sql_lower) {
            let table = caps.get(1).unwrap().as_str();
            if let Some(t) = self.tables.lock().unwrap().get_mut(&Self::key(table)) {
                let n = t.rows.len() as u64;
                t.rows.clear();
                return Ok(n);
            }
            return Ok(0);
        }

        tracing::debug!(sql, "mock driver: no-op execute (PreSQL/PostSQL/BEGIN/COMMIT/ROLLBACK)");
        Ok(0)
    }

    async fn bulk_export_flow(&self, sql: &str, columns: &[Column]) -> Result<Dataflow> {
        let sql_lower = sql.to_lowercase();
        let table = FROM_RE
            .captures(&sql_lower)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| EltError::Other(anyhow::anyhow!("cannot locate source table in: {sql}")))?;

        let tables = self.tables.lock().unwrap();
        let t = tables
            .get(&Self::key(&table))
            .ok_or_else(|| EltError::Other(anyhow::anyhow!("table does not exist: {table}")))?;

        let mut filtered = t.rows.clone();
        if let Some(caps) = WATERMARK_PRED_RE.captures(&sql_lower) {
            let col = caps.get(1).unwrap().as_str();
            let val = caps.get(2).unwrap().as_str().trim_matches('\'');
            if let Some(idx) = t.columns.iter().position(|c| c.normalized_name() == col) {
                filtered.retain(|r| {
                    r.get(idx)
                        .map(|v| json_ge(v, &Json::String(val.to_string())))
                        .unwrap_or(false)
                });
            }
        }

        let use_columns: Vec<Column> = if columns.is_empty() { t.columns.clone() } else { columns.to_vec() };
        drop(tables);

        let batch = rows_to_batch(&use_columns, &filtered)?;
        let (tx, rx) = mpsc::channel(elt_core::dataflow::DEFAULT_BUFFER_SIZE);
        if !filtered.is_empty() {
            let _ = tx.send(Message::Batch(batch)).await;
        }
        let _ = tx.send(Message::Eos).await;

        let mut df = Dataflow::new(format!("mock_export:{table}"), use_columns, CancellationToken::new());
        df.push_stream(Datastream::new(table, rx, 10_000));
        Ok(df)
    }

    async fn bulk_import_flow(&self, table: &str, dataflow: &mut Dataflow) -> Result<u64> {
        let columns = dataflow.columns().to_vec();
        let cancel = dataflow.cancel.clone();
        let mut total = 0u64;
        let mut checksums = HashMap::new();
        for stream in dataflow.streams_mut() {
            while let Some(msg) = stream.next().await {
                if cancel.is_cancelled() {
                    return Err(EltError::Interrupted);
                }
                if let Message::Batch(b) = msg {
                    let rows = batch_to_rows(&b, &columns);
                    total += rows.len() as u64;
                    elt_core::checksum::merge_checksums(
                        &mut checksums,
                        &elt_core::checksum::checksums_for_columns(&columns, &rows),
                    );
                    let mut tables = self.tables.lock().unwrap();
                    let entry = tables
                        .entry(Self::key(table))
                        .or_insert_with(|| MockTable { columns: columns.clone(), rows: Vec::new() });
                    entry.rows.extend(rows);
                }
            }
        }
        dataflow.merge_checksums(&checksums);

        if let Some((row, col, value)) = self.pending_corruption.lock().unwrap().take() {
            if let Some(t) = self.tables.lock().unwrap().get_mut(&Self::key(table)) {
                if let Some(r) = t.rows.get_mut(row) {
                    if let Some(cell) = r.get_mut(col) {
                        *cell = value;
                    }
                }
            }
        }

        Ok(total)
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.tables.lock().unwrap().remove(&Self::key(table));
        Ok(())
    }

    fn generate_ddl(&self, table: &str, columns: &[Column]) -> Result<String> {
        if columns.is_empty() {
            return Err(EltError::EmptySchema);
        }
        let cols: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", self.quote_ident(&c.name), sql_type_name(c.col_type)))
            .collect();
        Ok(format!("CREATE TABLE {} ({})", self.quote_ident(table), cols.join(", ")))
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<Column>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&Self::key(table))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn get_count(&self, table: &str) -> Result<u64> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&Self::key(table))
            .map(|t| t.rows.len() as u64)
            .unwrap_or(0))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.lock().unwrap().contains_key(&Self::key(table)))
    }

    async fn compare_checksums(
        &self,
        table: &str,
        columns: &[Column],
        stream_checksums: &HashMap<String, u64>,
    ) -> Result<Vec<String>> {
        let tables = self.tables.lock().unwrap();
        let Some(t) = tables.get(&Self::key(table)) else {
            return Ok(stream_checksums.keys().cloned().collect());
        };
        let driver_checksums = elt_core::checksums_for_columns(&t.columns, &t.rows);
        let mut mismatched = Vec::new();
        for col in columns {
            let key = col.normalized_name();
            let (Some(driver_sum), Some(stream_sum)) =
                (driver_checksums.get(&key), stream_checksums.get(&key))
            else {
                continue;
            };
            if driver_sum != stream_sum {
                mismatched.push(col.name.clone());
            }
        }
        Ok(mismatched)
    }

    async fn upsert(&self, temp: &str, finale: &str, primary_key: &[String]) -> Result<u64> {
        let temp_rows = {
            let tables = self.tables.lock().unwrap();
            let t = tables
                .get(&Self::key(temp))
                .ok_or_else(|| EltError::Other(anyhow::anyhow!("temp table missing: {temp}")))?;
            (t.columns.clone(), t.rows.clone())
        };
        let (columns, rows) = temp_rows;
        let pk_idxs: Vec<usize> = primary_key
            .iter()
            .filter_map(|k| columns.iter().position(|c| c.normalized_name() == k.to_lowercase()))
            .collect();

        let mut tables = self.tables.lock().unwrap();
        let entry = tables
            .entry(Self::key(finale))
            .or_insert_with(|| MockTable { columns: columns.clone(), rows: Vec::new() });

        let mut affected = 0u64;
        for row in rows {
            let key: Vec<Json> = pk_idxs.iter().map(|&i| row[i].clone()).collect();
            let existing = entry.rows.iter().position(|r| {
                pk_idxs.iter().enumerate().all(|(ki, &i)| r.get(i) == key.get(ki))
            });
            match existing {
                Some(pos) => entry.rows[pos] = row,
                None => entry.rows.push(row),
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn swap_table(&self, temp: &str, finale: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(t) = tables.remove(&Self::key(temp)) {
            tables.insert(Self::key(finale), t);
        }
        Ok(())
    }

    fn template_lookup(&self, name: &str) -> Option<String> {
        match name {
            "limit" => Some("LIMIT {limit}".to_string()),
            _ => None,
        }
    }

    fn supports_transactions(&self) -> bool {
        self.supports_tx
    }

    fn max_identifier_len(&self) -> usize {
        63
    }

    /// Unlike a real dialect, this mock interprets its own SQL text back
    /// into table/column lookups via plain-identifier regexes — so it
    /// leaves identifiers bare rather than quoting them.
    fn quote_ident(&self, ident: &str) -> String {
        ident.to_string()
    }
}

fn sql_type_name(t: ColumnType) -> &'static str {
    match t {
        ColumnType::Bool => "BOOLEAN",
        ColumnType::Integer => "BIGINT",
        ColumnType::Decimal => "NUMERIC",
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Text => "TEXT",
        ColumnType::Timestamp => "TIMESTAMPTZ",
        ColumnType::Date => "DATE",
        ColumnType::DateTime => "TIMESTAMP",
        ColumnType::Json => "JSONB",
        ColumnType::Binary => "BYTEA",
    }
}

fn json_cmp(a: &Json, b: &Json) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn json_ge(a: &Json, b: &Json) -> bool {
    match (a.as_f64(), b.as_f64().or_else(|| b.as_str().and_then(|s| s.parse().ok()))) {
        (Some(x), Some(y)) => x >= y,
        _ => a.to_string() >= b.as_str().unwrap_or_default().to_string(),
    }
}

static WATERMARK_RE_STR: &str = r"select\s+max\((\w+)\)\s+from\s+(\S+)";
static FROM_RE_STR: &str = r"from\s+(\S+)";
static WATERMARK_PRED_RE_STR: &str = r"(\w+)\s*>=\s*'?([^'\s)]+)'?";
static INSERT_SELECT_RE_STR: &str = r#"insert into\s+"?([\w.]+)"?\s*\(.*?\)\s*select\s+.*?\s+from\s+"?([\w.]+)"?$"#;

use once_cell::sync::Lazy;
static WATERMARK_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(WATERMARK_RE_STR).unwrap());
static FROM_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(FROM_RE_STR).unwrap());
static WATERMARK_PRED_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(WATERMARK_PRED_RE_STR).unwrap());
static INSERT_SELECT_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(INSERT_SELECT_RE_STR).unwrap());

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::Int64Array;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn int_batch(vals: &[i64]) -> Batch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        Batch::try_new(schema, vec![Arc::new(Int64Array::from(vals.to_vec()))]).unwrap()
    }

    #[tokio::test]
    async fn bulk_import_then_get_count_roundtrips() {
        let driver = MockDatabaseDriver::new();
        let columns = vec![Column::new("id", ColumnType::Integer, false)];
        let (tx, rx) = mpsc::channel(4);
        tx.send(Message::Batch(int_batch(&[1, 2, 3]))).await.unwrap();
        drop(tx);
        let mut df = Dataflow::new("t", columns.clone(), CancellationToken::new());
        df.push_stream(Datastream::new("s", rx, 10));
        let n = driver.bulk_import_flow("tmp_x", &mut df).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(driver.get_count("tmp_x").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn drop_table_removes_it() {
        let driver = MockDatabaseDriver::new();
        driver.seed("t", vec![Column::new("id", ColumnType::Integer, false)], &int_batch(&[1]));
        assert!(driver.table_exists("t").await.unwrap());
        driver.drop_table("t").await.unwrap();
        assert!(!driver.table_exists("t").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_primary_key() {
        let driver = MockDatabaseDriver::new();
        let columns = vec![Column::new("id", ColumnType::Integer, false)];
        driver.seed("temp1", columns.clone(), &int_batch(&[1, 2]));
        let n1 = driver.upsert("temp1", "final1", &["id".to_string()]).await.unwrap();
        assert_eq!(n1, 2);
        assert_eq!(driver.get_count("final1").await.unwrap(), 2);
        // second run with identical rows: still "2 affected" (same rows matched+replaced) but row count unchanged.
        driver.seed("temp1", columns, &int_batch(&[1, 2]));
        let n2 = driver.upsert("temp1", "final1", &["id".to_string()]).await.unwrap();
        assert_eq!(n2, 2);
        assert_eq!(driver.get_count("final1").await.unwrap(), 2);
    }
}
