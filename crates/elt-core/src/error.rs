//! Error kinds for the ELT engine.
//!
//! Mirrors the split used throughout the engine: a small enumerated set of
//! kinds that callers branch on (§7 of SPEC_FULL.md), plus a catch-all for
//! everything else wrapped through `anyhow`.

use thiserror::Error;

/// The structured error type returned by every core and engine operation.
#[derive(Debug, Error)]
pub enum EltError {
    /// The `Config` failed validation before any I/O was attempted.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// `Mode` did not match a known variant.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// Custom SQL for an upsert read did not contain `{upsert_where_cond}`.
    #[error("upsert SQL is missing the {{upsert_where_cond}} placeholder")]
    MissingUpsertPlaceholder,

    /// Source and target column name sets did not intersect.
    #[error("source and target schemas share no common columns")]
    SchemaMismatch,

    /// A driver could not establish a connection.
    #[error("connect failure: {0}")]
    ConnectFailure(String),

    /// A driver rejected credentials.
    #[error("auth failure: {0}")]
    AuthFailure(String),

    /// `cnt` (rows sent) and `tCnt` (rows counted in temp) disagreed.
    #[error("row count mismatch: sent {sent} rows but temp object has {counted}")]
    RowCountMismatch { sent: u64, counted: u64 },

    /// Per-column checksums disagreed between source and target.
    #[error("checksum mismatch on column `{column}`")]
    ChecksumMismatch { column: String },

    /// Promotion (Phase C) failed; the transaction was rolled back.
    #[error("promotion failed: {0}")]
    PromotionFailure(String),

    /// The task's cancellation token fired before completion.
    #[error("interrupted")]
    Interrupted,

    /// Not a failure: the driver has no direct-copy capability for this URL
    /// scheme, so the caller should fall back to the streaming path.
    #[error("direct copy unsupported for this source/target pair")]
    DirectCopyUnsupported,

    /// A placeholder (`{upsert_where_cond}`, `{drop_view}`) survived to
    /// execution time unresolved.
    #[error("unresolved placeholder `{0}` in SQL")]
    UnresolvedPlaceholder(String),

    /// Buffer-based schema inference ran on zero rows and zero declared
    /// columns; there is nothing to build a `CREATE TABLE` from.
    #[error("empty schema: no columns could be inferred")]
    EmptySchema,

    /// A watermark value could not be represented in the target's literal
    /// grammar (e.g. a binary column used as `update_key`).
    #[error("watermark value for column `{0}` is not representable as a SQL literal")]
    UnrepresentableWatermark(String),

    /// Everything else, wrapped with context via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EltError {
    /// True for the one error kind that is not actually a failure condition.
    pub fn is_benign(&self) -> bool {
        matches!(self, EltError::DirectCopyUnsupported)
    }
}

pub type Result<T> = std::result::Result<T, EltError>;
