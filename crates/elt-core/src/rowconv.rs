//! Conversion between Arrow `RecordBatch`es and a generic row
//! representation (`Vec<serde_json::Value>` per row).
//!
//! The engine's wire format is Arrow batches end to end (matching the
//! teacher's pipeline), but a few core operations — mock-driver storage,
//! per-column checksums, watermark literal formatting — are far simpler to
//! express against row values than against typed Arrow arrays directly.
//! This module is the single place that crosses that boundary.

use crate::column::{Column, ColumnType};
use crate::dataflow::Batch;
use datafusion::arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Float64Array, Int64Array,
    StringArray, TimestampMicrosecondArray,
};
use datafusion::arrow::datatypes::{Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use serde_json::Value as Json;
use std::sync::Arc;

/// Extracts one cell as a JSON value, given the `Column`'s inferred type.
fn cell_at(array: &ArrayRef, col_type: ColumnType, row: usize) -> Json {
    if array.is_null(row) {
        return Json::Null;
    }
    match col_type {
        ColumnType::Bool => {
            let a = array.as_any().downcast_ref::<BooleanArray>();
            a.map(|a| Json::Bool(a.value(row))).unwrap_or(Json::Null)
        }
        ColumnType::Integer => {
            let a = array.as_any().downcast_ref::<Int64Array>();
            a.map(|a| Json::Number(a.value(row).into())).unwrap_or(Json::Null)
        }
        ColumnType::Float | ColumnType::Decimal => {
            let a = array.as_any().downcast_ref::<Float64Array>();
            a.and_then(|a| serde_json::Number::from_f64(a.value(row)).map(Json::Number))
                .unwrap_or(Json::Null)
        }
        ColumnType::Date => {
            let a = array.as_any().downcast_ref::<Date32Array>();
            a.map(|a| Json::Number(a.value(row).into())).unwrap_or(Json::Null)
        }
        ColumnType::Timestamp | ColumnType::DateTime => {
            let a = array.as_any().downcast_ref::<TimestampMicrosecondArray>();
            a.map(|a| Json::Number(a.value(row).into())).unwrap_or(Json::Null)
        }
        ColumnType::Binary => {
            let a = array.as_any().downcast_ref::<BinaryArray>();
            a.map(|a| Json::String(base64_encode(a.value(row)))).unwrap_or(Json::Null)
        }
        ColumnType::Text | ColumnType::Json => {
            let a = array.as_any().downcast_ref::<StringArray>();
            a.map(|a| Json::String(a.value(row).to_string())).unwrap_or(Json::Null)
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(CHARS[((n >> 18) & 63) as usize] as char);
        out.push(CHARS[((n >> 12) & 63) as usize] as char);
        out.push(if chunk.len() > 1 { CHARS[((n >> 6) & 63) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { CHARS[(n & 63) as usize] as char } else { '=' });
    }
    out
}

/// Converts a batch into row-major JSON values, one `Vec<Json>` per row in
/// `columns` order. `columns` must describe `batch`'s schema (same order).
pub fn batch_to_rows(batch: &Batch, columns: &[Column]) -> Vec<Vec<Json>> {
    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut values = Vec::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            let array = batch.column(i);
            values.push(cell_at(array, col.col_type, row));
        }
        rows.push(values);
    }
    rows
}

/// The inverse of `batch_to_rows`: rebuilds a `RecordBatch` from row-major
/// JSON values and the columns describing them.
pub fn rows_to_batch(columns: &[Column], rows: &[Vec<Json>]) -> anyhow::Result<Batch> {
    let schema: SchemaRef = Arc::new(Schema::new(
        columns.iter().map(Column::to_arrow_field).collect::<Vec<_>>(),
    ));
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let get = |r: &Vec<Json>| r.get(i).cloned().unwrap_or(Json::Null);
        let array: ArrayRef = match col.col_type {
            ColumnType::Bool => Arc::new(BooleanArray::from(
                rows.iter().map(|r| get(r).as_bool()).collect::<Vec<_>>(),
            )),
            ColumnType::Integer => Arc::new(Int64Array::from(
                rows.iter().map(|r| get(r).as_i64()).collect::<Vec<_>>(),
            )),
            ColumnType::Float | ColumnType::Decimal => Arc::new(Float64Array::from(
                rows.iter().map(|r| get(r).as_f64()).collect::<Vec<_>>(),
            )),
            ColumnType::Date => Arc::new(Date32Array::from(
                rows.iter().map(|r| get(r).as_i64().map(|v| v as i32)).collect::<Vec<_>>(),
            )),
            ColumnType::Timestamp | ColumnType::DateTime => Arc::new(TimestampMicrosecondArray::from(
                rows.iter().map(|r| get(r).as_i64()).collect::<Vec<_>>(),
            )),
            ColumnType::Binary => {
                let owned: Vec<Option<Vec<u8>>> = rows
                    .iter()
                    .map(|r| get(r).as_str().map(|s| s.as_bytes().to_vec()))
                    .collect();
                let refs: Vec<Option<&[u8]>> = owned.iter().map(|o| o.as_deref()).collect();
                Arc::new(BinaryArray::from(refs))
            }
            ColumnType::Text | ColumnType::Json => Arc::new(StringArray::from(
                rows.iter()
                    .map(|r| match get(r) {
                        Json::String(s) => Some(s),
                        Json::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect::<Vec<_>>(),
            )),
        };
        arrays.push(array);
    }
    Ok(RecordBatch::try_new(schema, arrays)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Column;

    #[test]
    fn round_trips_mixed_types() {
        let columns = vec![
            Column::new("id", ColumnType::Integer, false),
            Column::new("name", ColumnType::Text, true),
            Column::new("active", ColumnType::Bool, true),
        ];
        let rows = vec![
            vec![Json::Number(1.into()), Json::String("a".into()), Json::Bool(true)],
            vec![Json::Number(2.into()), Json::Null, Json::Bool(false)],
        ];
        let batch = rows_to_batch(&columns, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let back = batch_to_rows(&batch, &columns);
        assert_eq!(back, rows);
    }
}
