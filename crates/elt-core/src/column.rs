//! Column typing: the dialect-neutral type tags inferred from sampled
//! buffers (§3), plus the Arrow `Field` each `Column` carries so batches can
//! flow through the same `RecordBatch` machinery the teacher pipeline uses.

use datafusion::arrow::datatypes::{DataType, Field, TimeUnit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Dialect-neutral column type, inferred from a leading sample buffer.
///
/// This is the type vocabulary used for cross-dialect mapping, lossy-cast
/// detection, and checksum computation (§3, §4.3, §4.4). It deliberately
/// does not carry dialect-specific precision; that lives on `Column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Integer,
    Decimal,
    Float,
    Text,
    Timestamp,
    Date,
    DateTime,
    Json,
    Binary,
}

impl ColumnType {
    /// Widening order used when two candidate types disagree during
    /// inference (e.g. a column that looks like an integer in one batch and
    /// a decimal in the next widens to `Decimal`, never the reverse).
    pub fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        if self == other {
            return self;
        }
        match (self, other) {
            (Integer, Decimal) | (Decimal, Integer) => Decimal,
            (Integer, Float) | (Float, Integer) => Float,
            (Decimal, Float) | (Float, Decimal) => Float,
            (Date, DateTime) | (DateTime, Date) => DateTime,
            (Timestamp, DateTime) | (DateTime, Timestamp) => DateTime,
            _ => Text,
        }
    }

    /// Whether casting a value of `self` into `target` can lose information.
    /// Used by the promotion phase's `castSrcFields` step to decide whether
    /// a cast needs an explicit, possibly-truncating conversion.
    pub fn is_lossy_cast_to(self, target: ColumnType) -> bool {
        use ColumnType::*;
        matches!(
            (self, target),
            (Decimal, Integer)
                | (Float, Integer)
                | (Float, Decimal)
                | (DateTime, Date)
                | (Json, _) if target != Json
        ) || matches!((self, target), (Text, t) if t != Text)
    }

    fn from_arrow(dt: &DataType) -> ColumnType {
        match dt {
            DataType::Boolean => ColumnType::Bool,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => ColumnType::Integer,
            DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => ColumnType::Decimal,
            DataType::Float16 | DataType::Float32 | DataType::Float64 => ColumnType::Float,
            DataType::Date32 | DataType::Date64 => ColumnType::Date,
            DataType::Timestamp(_, Some(_)) => ColumnType::Timestamp,
            DataType::Timestamp(_, None) => ColumnType::DateTime,
            DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
                ColumnType::Binary
            }
            DataType::Utf8 | DataType::LargeUtf8 => ColumnType::Text,
            _ => ColumnType::Json,
        }
    }

    fn to_arrow(self) -> DataType {
        match self {
            ColumnType::Bool => DataType::Boolean,
            ColumnType::Integer => DataType::Int64,
            ColumnType::Decimal => DataType::Decimal128(38, 9),
            ColumnType::Float => DataType::Float64,
            ColumnType::Text => DataType::Utf8,
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            ColumnType::Date => DataType::Date32,
            ColumnType::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
            ColumnType::Json => DataType::Utf8,
            ColumnType::Binary => DataType::Binary,
        }
    }
}

/// A single column in a `Datastream`'s schema: name, inferred type,
/// nullability, and length/precision hints (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
    /// Character length for text columns, total digits for decimal.
    pub length: Option<u32>,
    /// Decimal scale, when `col_type == Decimal`.
    pub precision: Option<u32>,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable,
            length: None,
            precision: None,
        }
    }

    /// Case-insensitive normalized name, used for every cross-schema
    /// comparison in the spec (source/target intersection, upsert key
    /// matching, checksum column alignment).
    pub fn normalized_name(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn from_arrow_field(field: &Field) -> Self {
        Self {
            name: field.name().clone(),
            col_type: ColumnType::from_arrow(field.data_type()),
            nullable: field.is_nullable(),
            length: None,
            precision: None,
        }
    }

    pub fn to_arrow_field(&self) -> Field {
        Field::new(&self.name, self.col_type.to_arrow(), self.nullable)
    }
}

/// Convenience: build an Arrow `SchemaRef` from a column list, the shape
/// `Dataflow` needs for its merged schema.
pub fn columns_to_arrow_schema(columns: &[Column]) -> datafusion::arrow::datatypes::SchemaRef {
    Arc::new(datafusion::arrow::datatypes::Schema::new(
        columns.iter().map(Column::to_arrow_field).collect::<Vec<_>>(),
    ))
}

/// Case-insensitive intersection of two column name sets, preserving the
/// order of `left`. Used by `ReadFromDB` step 3 (§4.2).
pub fn intersect_case_insensitive<'a>(left: &'a [Column], right: &[Column]) -> Vec<&'a Column> {
    let right_names: std::collections::HashSet<String> =
        right.iter().map(Column::normalized_name).collect();
    left.iter()
        .filter(|c| right_names.contains(&c.normalized_name()))
        .collect()
}
