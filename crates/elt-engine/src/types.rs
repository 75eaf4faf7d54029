//! Type inference from a Dataflow's leading buffer (§3, §4.3 Phase A):
//! turns a small sample of Arrow batches into the dialect-neutral `Column`
//! list used for DDL generation, checksum alignment, and schema
//! intersection. Cross-dialect mapping and lossy-cast detection themselves
//! live on `ColumnType` in `elt-core`; this module is the glue that walks a
//! buffer and folds per-batch schemas together via `ColumnType::widen`.

use elt_core::dataflow::Batch;
use elt_core::{Column, EltError, Result};

/// Infers a merged `Column` list from a leading buffer of batches. All
/// batches sampled from one Datastream share an Arrow schema in practice
/// (the reader is built against a single schema), but this still widens
/// field-by-field in case a future source produces divergent per-batch
/// schemas (e.g. semi-structured JSON). Fails with `EmptySchema` if the
/// buffer is empty and no columns were otherwise declared.
pub fn infer_columns(buffer: &[Batch]) -> Result<Vec<Column>> {
    let Some(first) = buffer.first() else {
        return Err(EltError::EmptySchema);
    };
    let mut merged: Vec<Column> = first.schema().fields().iter().map(|f| Column::from_arrow_field(f)).collect();

    for batch in &buffer[1..] {
        for field in batch.schema().fields().iter() {
            let incoming = Column::from_arrow_field(field);
            if let Some(existing) = merged.iter_mut().find(|c| c.normalized_name() == incoming.normalized_name()) {
                existing.col_type = existing.col_type.widen(incoming.col_type);
                existing.nullable = existing.nullable || incoming.nullable;
            } else {
                merged.push(incoming);
            }
        }
    }

    if merged.is_empty() {
        return Err(EltError::EmptySchema);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::Int64Array;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn empty_buffer_fails_with_empty_schema() {
        assert!(matches!(infer_columns(&[]).unwrap_err(), EltError::EmptySchema));
    }

    #[test]
    fn single_batch_yields_its_own_schema() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch = Batch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1, 2]))]).unwrap();
        let cols = infer_columns(&[batch]).unwrap();
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].name, "id");
    }
}
