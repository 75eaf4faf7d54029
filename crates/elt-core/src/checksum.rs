//! Per-column checksum computation (§3 Type Inference & Coercion, §4.3
//! Phase B `CompareChecksums`). Shared between the stream side (computed
//! while rows pass through the pipeline) and a driver's own internal
//! checksum, so the two sides of `CompareChecksums` agree on algorithm.
//!
//! The algorithm itself — fold each cell's canonical JSON text through a
//! hasher, XOR the per-row hashes together — is order-independent by
//! design: row order across a Dataflow's Datastreams is explicitly
//! unordered (§5), so a checksum that depended on row order would produce
//! spurious mismatches.

use crate::column::Column;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

fn cell_hash(v: &Json) -> u64 {
    let mut h = std::collections::hash_map::DefaultHasher::new();
    v.to_string().hash(&mut h);
    h.finish()
}

/// Computes one checksum per column in `columns`, normalized-name keyed, by
/// XOR-folding `cell_hash` across all rows. Missing cells hash as `Json::Null`.
pub fn checksums_for_columns(columns: &[Column], rows: &[Vec<Json>]) -> HashMap<String, u64> {
    let mut out = HashMap::with_capacity(columns.len());
    for (idx, col) in columns.iter().enumerate() {
        let sum = rows.iter().fold(0u64, |acc, row| {
            acc ^ cell_hash(row.get(idx).unwrap_or(&Json::Null))
        });
        out.insert(col.normalized_name(), sum);
    }
    out
}

/// XORs `partial` (one batch's worth of per-column checksums) into `acc`.
/// Since `checksums_for_columns` is an XOR-fold, combining disjoint row
/// batches this way is equivalent to computing the checksum over all rows
/// at once — the accumulator a Dataflow keeps as batches pass through it.
pub fn merge_checksums(acc: &mut HashMap<String, u64>, partial: &HashMap<String, u64>) {
    for (col, sum) in partial {
        *acc.entry(col.clone()).or_insert(0) ^= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    #[test]
    fn checksum_is_order_independent() {
        let columns = vec![Column::new("id", ColumnType::Integer, false)];
        let a = vec![vec![Json::from(1)], vec![Json::from(2)], vec![Json::from(3)]];
        let b = vec![vec![Json::from(3)], vec![Json::from(1)], vec![Json::from(2)]];
        assert_eq!(checksums_for_columns(&columns, &a), checksums_for_columns(&columns, &b));
    }

    #[test]
    fn checksum_changes_when_a_cell_changes() {
        let columns = vec![Column::new("id", ColumnType::Integer, false)];
        let a = vec![vec![Json::from(1)], vec![Json::from(2)]];
        let b = vec![vec![Json::from(1)], vec![Json::from(9)]];
        assert_ne!(checksums_for_columns(&columns, &a), checksums_for_columns(&columns, &b));
    }

    #[test]
    fn merging_per_batch_checksums_matches_computing_over_all_rows_at_once() {
        let columns = vec![Column::new("id", ColumnType::Integer, false)];
        let whole = vec![vec![Json::from(1)], vec![Json::from(2)], vec![Json::from(3)]];
        let expected = checksums_for_columns(&columns, &whole);

        let batch1 = vec![vec![Json::from(1)], vec![Json::from(2)]];
        let batch2 = vec![vec![Json::from(3)]];
        let mut acc = HashMap::new();
        merge_checksums(&mut acc, &checksums_for_columns(&columns, &batch1));
        merge_checksums(&mut acc, &checksums_for_columns(&columns, &batch2));

        assert_eq!(acc, expected);
    }
}
