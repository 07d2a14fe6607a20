//! Join executors for the three planned strategies.
//!
//! All strategies emit the same rows for the same inputs: one output row per
//! matching (left, right) pair, left columns first, then right columns without
//! the join keys. Rows whose key contains NULL never match.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use mfq_common::{MfqError, Result};
use mfq_planner::{BroadcastSide, JoinPlan, PlannedJoin};
use mfq_storage::{DatasetHandle, StoredLayout, TableStore};
use tracing::{debug, info};

use crate::hash::bucket_for;
use crate::scalar::{
    cmp_keys, key_from_row, key_has_null, resolve_key_indexes, rows_to_batch, ScalarValue,
};
use crate::stage::{read_part_rows, read_table_rows, run_units};

type Row = Vec<ScalarValue>;

/// Materialized join result, one entry of `parts` per output part.
#[derive(Debug, Clone)]
pub struct JoinOutput {
    pub schema: SchemaRef,
    pub parts: Vec<Vec<RecordBatch>>,
    pub layout: StoredLayout,
    pub rows: u64,
}

/// Column positions shared by every strategy.
struct JoinColumns {
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    right_keep: Vec<usize>,
}

impl JoinColumns {
    fn resolve(planned: &PlannedJoin) -> Result<Self> {
        let spec = planned.spec();
        let mut keys = spec.keys.clone();
        // Merge joins walk rows sorted by the bucket key first.
        if let JoinPlan::BucketedMergeJoin { key, .. } = planned.plan() {
            if let Some(pos) = keys.iter().position(|k| k == key) {
                let k = keys.remove(pos);
                keys.insert(0, k);
            }
        }
        let left_schema = spec.left.schema();
        let right_schema = spec.right.schema();
        let left_keys = resolve_key_indexes(&left_schema, &keys)?;
        let right_keys = resolve_key_indexes(&right_schema, &keys)?;
        let right_keep = (0..right_schema.fields().len())
            .filter(|idx| !right_keys.contains(idx))
            .collect();
        Ok(Self {
            left_keys,
            right_keys,
            right_keep,
        })
    }

    fn combine(&self, left: &Row, right: &Row) -> Row {
        let mut out = Vec::with_capacity(left.len() + self.right_keep.len());
        out.extend(left.iter().cloned());
        out.extend(self.right_keep.iter().map(|i| right[*i].clone()));
        out
    }
}

/// Execute `planned` against the rows held in `store`.
pub fn execute_join(store: &dyn TableStore, planned: &PlannedJoin) -> Result<JoinOutput> {
    let started = Instant::now();
    let cols = JoinColumns::resolve(planned)?;
    let schema = planned.output_schema();
    let (row_parts, layout) = match planned.plan() {
        JoinPlan::BroadcastJoin { broadcast_side } => (
            broadcast_join(store, planned, &cols, *broadcast_side)?,
            StoredLayout::Unpartitioned,
        ),
        JoinPlan::BucketedMergeJoin { key, bucket_count } => (
            bucketed_merge_join(store, planned, &cols, *bucket_count)?,
            StoredLayout::Bucketed {
                key: key.clone(),
                bucket_count: *bucket_count,
                sorted_by: Some(key.clone()),
            },
        ),
        JoinPlan::ShuffleHashJoin { partitions } => (
            shuffle_hash_join(store, planned, &cols, *partitions)?,
            StoredLayout::Unpartitioned,
        ),
    };

    let rows: u64 = row_parts.iter().map(|p| p.len() as u64).sum();
    let parts = row_parts
        .iter()
        .map(|rows| rows_to_part(&schema, rows))
        .collect::<Result<Vec<_>>>()?;
    info!(
        left = planned.spec().left.name(),
        right = planned.spec().right.name(),
        strategy = planned.plan().strategy_name(),
        rows_out = rows,
        parts = parts.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "join executed"
    );
    Ok(JoinOutput {
        schema,
        parts,
        layout,
        rows,
    })
}

/// Execute `planned` and persist the result as `output_name`.
///
/// The returned handle mirrors the persisted layout: bucketed for merge joins,
/// unpartitioned otherwise.
pub fn join_to_table(
    store: &dyn TableStore,
    planned: &PlannedJoin,
    output_name: &str,
) -> Result<DatasetHandle> {
    let out = execute_join(store, planned)?;
    let meta = store.write_table(output_name, out.schema, out.layout, out.parts)?;
    Ok(DatasetHandle::from_meta(&meta))
}

fn rows_to_part(schema: &SchemaRef, rows: &[Row]) -> Result<Vec<RecordBatch>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![rows_to_batch(schema, rows)?])
}

/// Hash table from join key to row positions, NULL keys skipped.
fn build_index<'a>(rows: &'a [Row], key_idx: &[usize]) -> HashMap<Row, Vec<&'a Row>> {
    let mut index: HashMap<Row, Vec<&Row>> = HashMap::new();
    for row in rows {
        let key = key_from_row(row, key_idx);
        if key_has_null(&key) {
            continue;
        }
        index.entry(key).or_default().push(row);
    }
    index
}

/// Probe `index` (built from `build_side`) with `probe` rows, in probe order.
fn probe_index(
    index: &HashMap<Row, Vec<&Row>>,
    probe: &[Row],
    probe_keys: &[usize],
    build_side: BroadcastSide,
    cols: &JoinColumns,
) -> Vec<Row> {
    let mut out = Vec::new();
    for row in probe {
        let key = key_from_row(row, probe_keys);
        if key_has_null(&key) {
            continue;
        }
        let Some(matches) = index.get(&key) else {
            continue;
        };
        for build_row in matches {
            out.push(match build_side {
                BroadcastSide::Left => cols.combine(build_row, row),
                BroadcastSide::Right => cols.combine(row, build_row),
            });
        }
    }
    out
}

fn broadcast_join(
    store: &dyn TableStore,
    planned: &PlannedJoin,
    cols: &JoinColumns,
    side: BroadcastSide,
) -> Result<Vec<Vec<Row>>> {
    let spec = planned.spec();
    let (build, probe, build_keys, probe_keys) = match side {
        BroadcastSide::Left => (&spec.left, &spec.right, &cols.left_keys, &cols.right_keys),
        BroadcastSide::Right => (&spec.right, &spec.left, &cols.right_keys, &cols.left_keys),
    };
    let build_rows = read_table_rows(store, build.name())?;
    let probe_parts = store.table_meta(probe.name())?.part_count();
    debug!(
        build = build.name(),
        build_rows = build_rows.len(),
        probe = probe.name(),
        probe_parts,
        "broadcast build side loaded"
    );
    if build_rows.is_empty() {
        return Ok(Vec::new());
    }
    let index = build_index(&build_rows, build_keys);
    run_units("broadcast probe", probe_parts, |part| {
        let rows = read_part_rows(store, probe.name(), part)?;
        Ok(probe_index(&index, &rows, probe_keys, side, cols))
    })
}

fn bucketed_merge_join(
    store: &dyn TableStore,
    planned: &PlannedJoin,
    cols: &JoinColumns,
    bucket_count: u32,
) -> Result<Vec<Vec<Row>>> {
    let spec = planned.spec();
    for handle in [&spec.left, &spec.right] {
        let parts = store.table_meta(handle.name())?.part_count();
        if parts != bucket_count {
            return Err(MfqError::LayoutInconsistency(format!(
                "'{}' is planned as {bucket_count} buckets but the store holds {parts} parts",
                handle.name()
            )));
        }
    }
    run_units("bucketed merge", bucket_count, |bucket| {
        let left = read_part_rows(store, spec.left.name(), bucket)?;
        let right = read_part_rows(store, spec.right.name(), bucket)?;
        Ok(sort_merge_rows(&left, &right, cols))
    })
}

fn sorted_keys(rows: &[Row], key_idx: &[usize]) -> Vec<(usize, Row)> {
    let mut keyed = rows
        .iter()
        .enumerate()
        .filter_map(|(idx, row)| {
            let key = key_from_row(row, key_idx);
            (!key_has_null(&key)).then_some((idx, key))
        })
        .collect::<Vec<_>>();
    keyed.sort_by(|a, b| cmp_keys(&a.1, &b.1));
    keyed
}

fn sort_merge_rows(left: &[Row], right: &[Row], cols: &JoinColumns) -> Vec<Row> {
    let ls = sorted_keys(left, &cols.left_keys);
    let rs = sorted_keys(right, &cols.right_keys);
    let mut out = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < ls.len() && j < rs.len() {
        match cmp_keys(&ls[i].1, &rs[j].1) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                let (i0, j0) = (i, j);
                while i < ls.len() && cmp_keys(&ls[i0].1, &ls[i].1) == Ordering::Equal {
                    i += 1;
                }
                while j < rs.len() && cmp_keys(&rs[j0].1, &rs[j].1) == Ordering::Equal {
                    j += 1;
                }
                for (li, _) in &ls[i0..i] {
                    for (ri, _) in &rs[j0..j] {
                        out.push(cols.combine(&left[*li], &right[*ri]));
                    }
                }
            }
        }
    }
    out
}

fn hash_partition(rows: Vec<Row>, key_idx: &[usize], partitions: u32) -> Vec<Vec<Row>> {
    let mut out = vec![Vec::new(); partitions as usize];
    for row in rows {
        let key = key_from_row(&row, key_idx);
        if key_has_null(&key) {
            continue;
        }
        out[bucket_for(&key, partitions) as usize].push(row);
    }
    out
}

fn shuffle_hash_join(
    store: &dyn TableStore,
    planned: &PlannedJoin,
    cols: &JoinColumns,
    partitions: u32,
) -> Result<Vec<Vec<Row>>> {
    let spec = planned.spec();
    let partitions = partitions.max(1);
    let left = hash_partition(
        read_table_rows(store, spec.left.name())?,
        &cols.left_keys,
        partitions,
    );
    let right = hash_partition(
        read_table_rows(store, spec.right.name())?,
        &cols.right_keys,
        partitions,
    );
    debug!(
        left = spec.left.name(),
        right = spec.right.name(),
        partitions,
        "shuffle exchange complete"
    );
    run_units("shuffle hash join", partitions, |p| {
        let index = build_index(&right[p as usize], &cols.right_keys);
        Ok(probe_index(
            &index,
            &left[p as usize],
            &cols.left_keys,
            BroadcastSide::Right,
            cols,
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema, SchemaRef};
    use mfq_common::MfqError;
    use mfq_planner::{JoinPlan, JoinPlannerConfig, JoinSpec, PlannedJoin};
    use mfq_storage::{DatasetHandle, MemoryTableStore, StoredLayout, TableStore};

    use super::{execute_join, join_to_table};
    use crate::hash::bucket_for;
    use crate::scalar::{cmp_keys, rows_from_batches, ScalarValue};

    fn details_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("match_id", DataType::Int64, true),
            Field::new("player", DataType::Utf8, true),
        ]))
    }

    fn matches_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("match_id", DataType::Int64, true),
            Field::new("map", DataType::Utf8, true),
        ]))
    }

    fn batch(schema: &SchemaRef, ids: Vec<Option<i64>>, names: Vec<&str>) -> RecordBatch {
        RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .expect("batch")
    }

    fn details() -> RecordBatch {
        batch(
            &details_schema(),
            vec![Some(1), Some(1), Some(2), Some(3), None, Some(5)],
            vec!["ann", "bob", "cid", "dee", "eve", "fay"],
        )
    }

    fn matches() -> RecordBatch {
        batch(
            &matches_schema(),
            vec![Some(1), Some(2), Some(2), Some(4), None],
            vec!["Alpine", "Orion", "Orion-2", "Plaza", "Void"],
        )
    }

    fn write_plain(store: &MemoryTableStore, name: &str, b: RecordBatch) -> DatasetHandle {
        let half = b.num_rows() / 2;
        let parts = vec![vec![b.slice(0, half)], vec![b.slice(half, b.num_rows() - half)]];
        let meta = store
            .write_table(name, b.schema(), StoredLayout::Unpartitioned, parts)
            .expect("write");
        DatasetHandle::from_meta(&meta)
    }

    fn write_bucketed(store: &MemoryTableStore, name: &str, b: RecordBatch, n: u32) -> DatasetHandle {
        let rows = rows_from_batches(&[b.clone()]).expect("rows");
        let mut buckets = vec![Vec::new(); n as usize];
        for row in rows {
            buckets[bucket_for(&row[..1], n) as usize].push(row);
        }
        let parts = buckets
            .iter()
            .map(|rows| vec![crate::scalar::rows_to_batch(&b.schema(), rows).expect("bucket")])
            .collect();
        let meta = store
            .write_table(
                name,
                b.schema(),
                StoredLayout::Bucketed {
                    key: "match_id".to_string(),
                    bucket_count: n,
                    sorted_by: None,
                },
                parts,
            )
            .expect("write");
        DatasetHandle::from_meta(&meta)
    }

    fn naive_join(left: &RecordBatch, right: &RecordBatch) -> Vec<Vec<ScalarValue>> {
        let l = rows_from_batches(&[left.clone()]).expect("left");
        let r = rows_from_batches(&[right.clone()]).expect("right");
        let mut out = Vec::new();
        for lr in &l {
            for rr in &r {
                if !lr[0].is_null() && lr[0] == rr[0] {
                    out.push(vec![lr[0].clone(), lr[1].clone(), rr[1].clone()]);
                }
            }
        }
        sorted(out)
    }

    fn sorted(mut rows: Vec<Vec<ScalarValue>>) -> Vec<Vec<ScalarValue>> {
        rows.sort_by(|a, b| cmp_keys(a, b));
        rows
    }

    fn output_rows(store: &MemoryTableStore, planned: &PlannedJoin) -> Vec<Vec<ScalarValue>> {
        let out = execute_join(store, planned).expect("execute");
        let batches = out.parts.into_iter().flatten().collect::<Vec<_>>();
        sorted(rows_from_batches(&batches).expect("rows"))
    }

    #[test]
    fn broadcast_matches_naive_join_on_either_side() {
        let store = MemoryTableStore::new();
        let d = write_plain(&store, "details", details());
        let m = write_plain(&store, "matches", matches());
        let expected = naive_join(&details(), &matches());
        assert_eq!(expected.len(), 3);

        let cfg = JoinPlannerConfig::default();
        let right = PlannedJoin::new(
            &store,
            JoinSpec::inner(d.clone(), m.as_broadcast(), &["match_id"]),
            &cfg,
        )
        .expect("plan");
        assert_eq!(output_rows(&store, &right), expected);

        let left = PlannedJoin::new(
            &store,
            JoinSpec::inner(d.as_broadcast(), m, &["match_id"]),
            &cfg,
        )
        .expect("plan");
        assert!(matches!(left.plan(), JoinPlan::BroadcastJoin { .. }));
        assert_eq!(output_rows(&store, &left), expected);
    }

    #[test]
    fn empty_broadcast_side_yields_empty_result() {
        let store = MemoryTableStore::new();
        let d = write_plain(&store, "details", details());
        let meta = store
            .write_table("matches", matches_schema(), StoredLayout::Unpartitioned, vec![])
            .expect("write");
        let m = DatasetHandle::from_meta(&meta).as_broadcast();
        let planned = PlannedJoin::new(
            &store,
            JoinSpec::inner(d, m, &["match_id"]),
            &JoinPlannerConfig::default(),
        )
        .expect("plan");
        let out = execute_join(&store, &planned).expect("execute");
        assert_eq!(out.rows, 0);
        assert_eq!(out.schema.fields().len(), 3);
    }

    #[test]
    fn merge_and_shuffle_agree_with_naive_join() {
        let store = MemoryTableStore::new();
        let d = write_bucketed(&store, "details", details(), 4);
        let m = write_bucketed(&store, "matches", matches(), 4);
        let expected = naive_join(&details(), &matches());

        let merge = PlannedJoin::new(
            &store,
            JoinSpec::inner(d.clone(), m.clone(), &["match_id"]),
            &JoinPlannerConfig::default(),
        )
        .expect("plan");
        assert!(matches!(merge.plan(), JoinPlan::BucketedMergeJoin { .. }));
        assert_eq!(output_rows(&store, &merge), expected);

        let d_plain = write_plain(&store, "details_plain", details());
        let shuffle = PlannedJoin::new(
            &store,
            JoinSpec::inner(d_plain, m, &["match_id"]),
            &JoinPlannerConfig::default(),
        )
        .expect("plan");
        assert!(shuffle.plan().is_degraded());
        assert_eq!(output_rows(&store, &shuffle), expected);
    }

    #[test]
    fn merge_output_is_persisted_bucketed() {
        let store = MemoryTableStore::new();
        let d = write_bucketed(&store, "details", details(), 4);
        let m = write_bucketed(&store, "matches", matches(), 4);
        let planned = PlannedJoin::new(
            &store,
            JoinSpec::inner(d, m, &["match_id"]),
            &JoinPlannerConfig::default(),
        )
        .expect("plan");
        let handle = join_to_table(&store, &planned, "joined").expect("join");
        assert_eq!(handle.layout(), planned.output_layout());
        assert_eq!(
            store.read_layout("joined").expect("layout"),
            StoredLayout::Bucketed {
                key: "match_id".to_string(),
                bucket_count: 4,
                sorted_by: Some("match_id".to_string()),
            }
        );
        assert_eq!(handle.estimated_row_count(), 3);
    }

    #[test]
    fn merge_refuses_tables_whose_parts_drift_from_the_plan() {
        let store = MemoryTableStore::new();
        let d = write_bucketed(&store, "details", details(), 4);
        let m = write_bucketed(&store, "matches", matches(), 4);
        let planned = PlannedJoin::new(
            &store,
            JoinSpec::inner(d, m, &["match_id"]),
            &JoinPlannerConfig::default(),
        )
        .expect("plan");
        write_bucketed(&store, "matches", matches(), 2);
        let err = execute_join(&store, &planned).expect_err("drifted");
        assert!(matches!(err, MfqError::LayoutInconsistency(_)));
    }
}
