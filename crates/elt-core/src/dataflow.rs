//! Dataflow / Datastream (§3): a lazy, pull-based composite stream of typed
//! rows, carrying a merged schema, a cancellation context, and aggregate
//! counters. Keeps the teacher's Arrow-batch-over-bounded-channel shape
//! (`Message` / `BatchTx` / `BatchRx` in `rde-core`), generalized from
//! streaming telemetry rows to ELT rows.

use crate::checksum::merge_checksums;
use crate::column::Column;
use crate::error::{EltError, Result};
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A batch of columnar rows, in Apache Arrow format.
pub type Batch = RecordBatch;

/// Messages passed between reader and writer threads within a Datastream.
#[derive(Debug, Clone)]
pub enum Message {
    Batch(Batch),
    /// Event-time watermark progress, epoch milliseconds.
    Watermark(i64),
    /// End-of-stream marker.
    Eos,
}

pub type BatchTx = mpsc::Sender<Message>;
pub type BatchRx = mpsc::Receiver<Message>;

/// Default bounded-channel capacity between a Datastream's reader and its
/// consumer; bounds memory for a single task to buffer size × concurrency
/// rather than stream cardinality (§2).
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// A lazy, single-pass, non-restartable sequence of rows of N typed
/// columns (§3). Produces a small leading buffer used for type inference
/// before the remainder flows through.
pub struct Datastream {
    pub name: String,
    rx: BatchRx,
    /// Leading sample batches, captured for schema inference before the
    /// rest of the stream is drained. Cleared once `take_buffer` is called.
    leading_buffer: Vec<Batch>,
    buffer_filled: bool,
    buffer_target_rows: usize,
    rows: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    closed: bool,
}

impl Datastream {
    pub fn new(name: impl Into<String>, rx: BatchRx, buffer_target_rows: usize) -> Self {
        Self {
            name: name.into(),
            rx,
            leading_buffer: Vec::new(),
            buffer_filled: false,
            buffer_target_rows,
            rows: Arc::new(AtomicU64::new(0)),
            bytes: Arc::new(AtomicU64::new(0)),
            closed: false,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// The batches captured by `fill_leading_buffer`, if it has run and
    /// `next()` hasn't yet consumed them. Used by schema inference when a
    /// Dataflow was constructed without a known column list.
    pub fn leading_buffer(&self) -> &[Batch] {
        &self.leading_buffer
    }

    /// Pulls batches until either the buffer target row count is reached or
    /// the stream ends, without discarding them — they remain at the head
    /// of the stream for `next()` to yield afterward. Used by schema
    /// inference (§3, §4.3 Phase A).
    pub async fn fill_leading_buffer(&mut self) -> &[Batch] {
        if self.buffer_filled {
            return &self.leading_buffer;
        }
        let mut rows_seen = 0usize;
        while rows_seen < self.buffer_target_rows {
            match self.rx.recv().await {
                Some(Message::Batch(b)) => {
                    rows_seen += b.num_rows();
                    self.account(&b);
                    self.leading_buffer.push(b);
                }
                Some(Message::Watermark(_)) => continue,
                Some(Message::Eos) | None => {
                    self.closed = true;
                    break;
                }
            }
        }
        self.buffer_filled = true;
        &self.leading_buffer
    }

    fn account(&self, b: &Batch) {
        self.rows.fetch_add(b.num_rows() as u64, Ordering::Relaxed);
        let size: usize = b
            .columns()
            .iter()
            .map(|c| c.get_array_memory_size())
            .sum();
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Pulls the next message: first drains the leading buffer (if filled
    /// and not yet consumed), then the underlying channel.
    pub async fn next(&mut self) -> Option<Message> {
        if !self.leading_buffer.is_empty() {
            let b = self.leading_buffer.remove(0);
            return Some(Message::Batch(b));
        }
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(Message::Batch(b)) => {
                self.account(&b);
                Some(Message::Batch(b))
            }
            Some(other) => Some(other),
            None => {
                self.closed = true;
                None
            }
        }
    }

    /// Drains remaining messages without processing them, as part of Close.
    pub async fn drain(&mut self) {
        while self.next().await.is_some() {}
        self.closed = true;
    }
}

/// A composite stream: one or more Datastreams sharing a merged column
/// schema, a cancellation context, and an accumulating error slot (§3).
/// Lifetime: open -> draining -> closed. Counters are monotone until
/// `close()`.
pub struct Dataflow {
    pub name: String,
    streams: Vec<Datastream>,
    schema: SchemaRef,
    columns: Vec<Column>,
    pub cancel: CancellationToken,
    error: Arc<Mutex<Option<String>>>,
    state: DataflowState,
    /// Deferred cleanup closures run on `close()`, regardless of outcome —
    /// e.g. temp-file removal (§3, §5).
    cleanups: Vec<Box<dyn FnOnce() + Send>>,
    /// Per-column checksums, XOR-accumulated one batch at a time as rows
    /// pass through a consumer such as `bulk_import_flow` (§4.3 Phase B
    /// `CompareChecksums`'s stream-computed side).
    checksums: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataflowState {
    Open,
    Draining,
    Closed,
}

impl Dataflow {
    pub fn new(name: impl Into<String>, columns: Vec<Column>, cancel: CancellationToken) -> Self {
        let schema = crate::column::columns_to_arrow_schema(&columns);
        Self {
            name: name.into(),
            streams: Vec::new(),
            schema,
            columns,
            cancel,
            error: Arc::new(Mutex::new(None)),
            state: DataflowState::Open,
            cleanups: Vec::new(),
            checksums: HashMap::new(),
        }
    }

    pub fn push_stream(&mut self, ds: Datastream) {
        self.streams.push(ds);
    }

    pub fn streams_mut(&mut self) -> &mut [Datastream] {
        &mut self.streams
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn set_columns(&mut self, columns: Vec<Column>) {
        self.schema = crate::column::columns_to_arrow_schema(&columns);
        self.columns = columns;
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn register_cleanup(&mut self, f: impl FnOnce() + Send + 'static) {
        self.cleanups.push(Box::new(f));
    }

    pub fn set_error(&self, msg: impl Into<String>) {
        *self.error.lock().unwrap() = Some(msg.into());
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    /// Total rows read across all constituent Datastreams so far.
    pub fn count(&self) -> u64 {
        self.streams.iter().map(Datastream::rows).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.streams.iter().map(Datastream::bytes).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Runs each constituent stream's leading-buffer fill (needed for
    /// schema inference before DDL generation, §4.3 Phase A).
    pub async fn fill_leading_buffers(&mut self) {
        for s in &mut self.streams {
            s.fill_leading_buffer().await;
        }
    }

    /// Consolidates per-stream statistics; a no-op placeholder point the
    /// staging protocol calls after the bulk load (§4.3 Phase B, `SyncStats`).
    pub fn sync_stats(&self) {
        tracing::debug!(dataflow = %self.name, rows = self.count(), bytes = self.bytes(), "sync_stats");
    }

    /// Marks the dataflow as having nothing left to drain (used after a
    /// direct-copy load bypasses the row pipe, §4.3 Phase B).
    pub fn mark_drained(&mut self) {
        self.state = DataflowState::Draining;
    }

    /// Folds one batch's per-column checksums into the running total. A
    /// consumer (e.g. a `DatabaseDriver::bulk_import_flow` implementation)
    /// calls this for every batch it reads, so the accumulator reflects
    /// exactly the rows that actually flowed through, not a recomputation
    /// from scratch.
    pub fn accumulate_checksums(&mut self, batch: &Batch) {
        let rows = crate::rowconv::batch_to_rows(batch, &self.columns);
        let partial = crate::checksum::checksums_for_columns(&self.columns, &rows);
        merge_checksums(&mut self.checksums, &partial);
    }

    /// Folds an already-computed per-column checksum map into the running
    /// total. Used when a consumer needs to hold its own mutable borrow of
    /// the Dataflow's streams while it reads (e.g. iterating
    /// `streams_mut()`), and so accumulates locally before merging once the
    /// borrow ends.
    pub fn merge_checksums(&mut self, partial: &HashMap<String, u64>) {
        merge_checksums(&mut self.checksums, partial);
    }

    /// The per-column checksums accumulated so far via `accumulate_checksums`.
    pub fn checksums(&self) -> HashMap<String, u64> {
        self.checksums.clone()
    }

    /// Drains and closes every Datastream and runs deferred cleanup. Safe
    /// to call more than once; only the first call has effect.
    pub async fn close(&mut self) {
        if self.state == DataflowState::Closed {
            return;
        }
        self.state = DataflowState::Draining;
        for s in &mut self.streams {
            s.drain().await;
        }
        self.state = DataflowState::Closed;
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EltError::Interrupted);
        }
        Ok(())
    }

    /// Attaches a task's cancellation token to an already-constructed
    /// Dataflow. Driver trait methods build a Dataflow without knowing the
    /// owning task, so the read path re-points `cancel` at the real token
    /// once the Dataflow comes back (§5).
    pub fn set_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use datafusion::arrow::array::Int64Array;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};

    fn make_batch(n: i64) -> Batch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let arr = Int64Array::from((0..n).collect::<Vec<_>>());
        RecordBatch::try_new(schema, vec![Arc::new(arr)]).unwrap()
    }

    #[tokio::test]
    async fn datastream_counts_rows_and_bytes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Message::Batch(make_batch(10))).await.unwrap();
        tx.send(Message::Eos).await.unwrap();
        let mut ds = Datastream::new("s1", rx, 100);
        while ds.next().await.is_some() {}
        assert_eq!(ds.rows(), 10);
    }

    #[tokio::test]
    async fn leading_buffer_is_replayed_by_next() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Message::Batch(make_batch(5))).await.unwrap();
        tx.send(Message::Eos).await.unwrap();
        let mut ds = Datastream::new("s1", rx, 5);
        let _ = ds.fill_leading_buffer().await;
        assert_eq!(ds.rows(), 5);
        let msg = ds.next().await;
        assert!(matches!(msg, Some(Message::Batch(_))));
        assert!(ds.next().await.is_none());
    }

    #[tokio::test]
    async fn dataflow_counts_are_monotone_until_close() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Message::Batch(make_batch(3))).await.unwrap();
        tx.send(Message::Eos).await.unwrap();
        let mut df = Dataflow::new(
            "df",
            vec![Column::new("id", ColumnType::Integer, false)],
            CancellationToken::new(),
        );
        df.push_stream(Datastream::new("s1", rx, 100));
        df.fill_leading_buffers().await;
        assert_eq!(df.count(), 3);
        df.close().await;
        assert_eq!(df.count(), 3);
    }

    #[tokio::test]
    async fn cleanup_runs_on_close() {
        let (_tx, rx) = mpsc::channel::<Message>(4);
        drop(_tx);
        let mut df = Dataflow::new("df", vec![], CancellationToken::new());
        df.push_stream(Datastream::new("s1", rx, 10));
        let flag = Arc::new(AtomicU64::new(0));
        let flag2 = flag.clone();
        df.register_cleanup(move || {
            flag2.store(1, Ordering::SeqCst);
        });
        df.close().await;
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }
}
