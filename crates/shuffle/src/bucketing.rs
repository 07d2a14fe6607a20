//! Persist a dataset pre-partitioned into buckets by a stable key hash.

use std::time::Instant;

use mfq_common::{MfqError, Result};
use mfq_execution::{bucket_for, cmp_scalar, read_table_rows, rows_to_batch, ScalarValue};
use mfq_storage::{DatasetHandle, StoredLayout, TableStore};
use tracing::info;

/// Rewrite `dataset` as `target` with `bucket_count` buckets on `key`.
///
/// Bucket `i` holds exactly the rows whose key hashes to `i`, sorted ascending
/// by key (ties keep input order). `target` may equal the source name; the
/// rows are fully read before the store replaces the table.
pub fn bucket(
    store: &dyn TableStore,
    dataset: &DatasetHandle,
    key: &str,
    bucket_count: u32,
    target: &str,
) -> Result<DatasetHandle> {
    if bucket_count == 0 {
        return Err(MfqError::InvalidConfig(
            "bucket_count must be greater than zero".to_string(),
        ));
    }
    let schema = dataset.schema();
    let key_idx = schema.index_of(key).map_err(|_| {
        MfqError::SchemaMismatch(format!(
            "bucket key '{key}' missing from '{}'",
            dataset.name()
        ))
    })?;

    let started = Instant::now();
    let rows = read_table_rows(store, dataset.name())?;
    let total = rows.len();
    let mut buckets: Vec<Vec<Vec<ScalarValue>>> = vec![Vec::new(); bucket_count as usize];
    for row in rows {
        let b = bucket_for(std::slice::from_ref(&row[key_idx]), bucket_count);
        buckets[b as usize].push(row);
    }
    let parts = buckets
        .iter_mut()
        .map(|rows| {
            rows.sort_by(|a, b| cmp_scalar(&a[key_idx], &b[key_idx]));
            if rows.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![rows_to_batch(&schema, rows)?])
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let meta = store.write_table(
        target,
        schema,
        StoredLayout::Bucketed {
            key: key.to_string(),
            bucket_count,
            sorted_by: Some(key.to_string()),
        },
        parts,
    )?;
    info!(
        source = dataset.name(),
        target,
        key,
        bucket_count,
        rows = total,
        bytes = meta.stats.bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "dataset bucketed"
    );
    Ok(DatasetHandle::from_meta(&meta))
}
