//! Group-by aggregation with deterministic descending ranking.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use mfq_common::{MfqError, Result};
use mfq_storage::{DatasetHandle, TableStore};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::scalar::{
    cmp_keys, cmp_scalar, key_from_row, resolve_key_indexes, rows_to_batch, scalar_matches_type,
    ScalarValue,
};
use crate::stage::{read_part_rows, run_units};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reducer {
    /// Number of non-NULL metric values.
    Count,
    /// Mean of non-NULL metric values.
    Average,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub column: String,
    pub reducer: Reducer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
}

/// Row filter applied before grouping. NULL cells never pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: ScalarValue,
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: ScalarValue) -> Self {
        Self {
            column: column.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    fn accepts(&self, cell: &ScalarValue) -> bool {
        if cell.is_null() || self.value.is_null() {
            return false;
        }
        let equal = cmp_scalar(cell, &self.value) == Ordering::Equal;
        match self.op {
            CompareOp::Eq => equal,
            CompareOp::NotEq => !equal,
        }
    }
}

/// What to group by, what to compute, and how many ranked rows to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub group_keys: Vec<String>,
    pub metric: Metric,
    /// Output column name of the metric.
    pub alias: String,
    pub filter: Option<Predicate>,
    pub limit: Option<usize>,
}

impl AggregationSpec {
    pub fn count(group_keys: &[&str], column: &str, alias: &str) -> Self {
        Self::new(group_keys, column, Reducer::Count, alias)
    }

    pub fn average(group_keys: &[&str], column: &str, alias: &str) -> Self {
        Self::new(group_keys, column, Reducer::Average, alias)
    }

    fn new(group_keys: &[&str], column: &str, reducer: Reducer, alias: &str) -> Self {
        Self {
            group_keys: group_keys.iter().map(|k| (*k).to_string()).collect(),
            metric: Metric {
                column: column.to_string(),
                reducer,
            },
            alias: alias.to_string(),
            filter: None,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Count(u64),
    /// `None` when the group had no non-NULL metric values.
    Average(Option<f64>),
}

impl MetricValue {
    fn to_scalar(self) -> ScalarValue {
        match self {
            MetricValue::Count(n) => ScalarValue::Int64(n as i64),
            MetricValue::Average(Some(v)) => ScalarValue::float(v),
            MetricValue::Average(None) => ScalarValue::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub group: Vec<ScalarValue>,
    pub value: MetricValue,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
}

type Partial = HashMap<Vec<ScalarValue>, Accumulator>;

struct Columns {
    group: Vec<usize>,
    metric: usize,
    filter: Option<usize>,
}

/// Aggregate every stored part of `dataset` and rank the groups.
pub fn aggregate(
    store: &dyn TableStore,
    dataset: &DatasetHandle,
    spec: &AggregationSpec,
) -> Result<Vec<AggregateRow>> {
    let started = Instant::now();
    let cols = resolve_columns(dataset, spec)?;
    let parts = store.table_meta(dataset.name())?.part_count();
    let partials = run_units("aggregate", parts, |part| {
        let rows = read_part_rows(store, dataset.name(), part)?;
        partial_aggregate(&rows, &cols, spec)
    })?;

    let mut merged = Partial::new();
    for partial in partials {
        for (group, acc) in partial {
            let entry = merged.entry(group).or_default();
            entry.count += acc.count;
            entry.sum += acc.sum;
        }
    }

    let mut out = merged
        .into_iter()
        .map(|(group, acc)| AggregateRow {
            group,
            value: finish(spec.metric.reducer, acc),
        })
        .collect::<Vec<_>>();
    out.sort_by(rank_order);
    if let Some(limit) = spec.limit {
        out.truncate(limit);
    }
    info!(
        dataset = dataset.name(),
        group_keys = ?spec.group_keys,
        metric = %spec.alias,
        groups = out.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "aggregation complete"
    );
    Ok(out)
}

/// Output schema: group key columns with their source types, then the metric.
pub fn aggregate_schema(dataset: &DatasetHandle, spec: &AggregationSpec) -> Result<SchemaRef> {
    let source = dataset.schema();
    let mut fields = Vec::with_capacity(spec.group_keys.len() + 1);
    for key in &spec.group_keys {
        let field = source.field_with_name(key).map_err(|_| {
            MfqError::SchemaMismatch(format!(
                "group key '{key}' missing from '{}'",
                dataset.name()
            ))
        })?;
        fields.push(Field::new(key, field.data_type().clone(), true));
    }
    let metric_type = match spec.metric.reducer {
        Reducer::Count => DataType::Int64,
        Reducer::Average => DataType::Float64,
    };
    fields.push(Field::new(&spec.alias, metric_type, true));
    Ok(Arc::new(Schema::new(fields)))
}

/// Render ranked rows as one batch for display.
pub fn aggregate_to_batch(
    dataset: &DatasetHandle,
    spec: &AggregationSpec,
    rows: &[AggregateRow],
) -> Result<RecordBatch> {
    let schema = aggregate_schema(dataset, spec)?;
    let values = rows
        .iter()
        .map(|r| {
            let mut row = r.group.clone();
            row.push(r.value.to_scalar());
            row
        })
        .collect::<Vec<_>>();
    rows_to_batch(&schema, &values)
}

fn resolve_columns(dataset: &DatasetHandle, spec: &AggregationSpec) -> Result<Columns> {
    let schema = dataset.schema();
    let missing = |col: &str| {
        MfqError::SchemaMismatch(format!("column '{col}' missing from '{}'", dataset.name()))
    };
    for key in &spec.group_keys {
        if schema.index_of(key).is_err() {
            return Err(missing(key));
        }
    }
    let group = resolve_key_indexes(&schema, &spec.group_keys)?;
    let metric = schema
        .index_of(&spec.metric.column)
        .map_err(|_| missing(&spec.metric.column))?;
    if spec.metric.reducer == Reducer::Average && !schema.field(metric).data_type().is_numeric() {
        return Err(MfqError::SchemaMismatch(format!(
            "cannot average non-numeric column '{}' ({:?})",
            spec.metric.column,
            schema.field(metric).data_type()
        )));
    }
    let filter = match &spec.filter {
        Some(p) => {
            let idx = schema.index_of(&p.column).map_err(|_| missing(&p.column))?;
            let column_type = schema.field(idx).data_type();
            if !scalar_matches_type(&p.value, column_type) {
                return Err(MfqError::SchemaMismatch(format!(
                    "filter value {} cannot compare with column '{}' ({column_type:?})",
                    p.value, p.column
                )));
            }
            Some(idx)
        }
        None => None,
    };
    Ok(Columns {
        group,
        metric,
        filter,
    })
}

fn partial_aggregate(
    rows: &[Vec<ScalarValue>],
    cols: &Columns,
    spec: &AggregationSpec,
) -> Result<Partial> {
    let mut acc = Partial::new();
    for row in rows {
        if let (Some(idx), Some(pred)) = (cols.filter, &spec.filter) {
            if !pred.accepts(&row[idx]) {
                continue;
            }
        }
        let entry = acc.entry(key_from_row(row, &cols.group)).or_default();
        let cell = &row[cols.metric];
        if cell.is_null() {
            continue;
        }
        entry.count += 1;
        if spec.metric.reducer == Reducer::Average {
            entry.sum += cell.as_f64().ok_or_else(|| {
                MfqError::Execution(format!(
                    "non-numeric value in '{}': {cell}",
                    spec.metric.column
                ))
            })?;
        }
    }
    Ok(acc)
}

fn finish(reducer: Reducer, acc: Accumulator) -> MetricValue {
    match reducer {
        Reducer::Count => MetricValue::Count(acc.count),
        Reducer::Average if acc.count == 0 => MetricValue::Average(None),
        Reducer::Average => MetricValue::Average(Some(acc.sum / acc.count as f64)),
    }
}

/// Descending by metric, NULL averages last, then ascending group key.
fn rank_order(a: &AggregateRow, b: &AggregateRow) -> Ordering {
    let by_metric = match (a.value, b.value) {
        (MetricValue::Count(x), MetricValue::Count(y)) => y.cmp(&x),
        (MetricValue::Average(Some(x)), MetricValue::Average(Some(y))) => y.total_cmp(&x),
        (MetricValue::Average(None), MetricValue::Average(Some(_))) => Ordering::Greater,
        (MetricValue::Average(Some(_)), MetricValue::Average(None)) => Ordering::Less,
        _ => Ordering::Equal,
    };
    by_metric.then_with(|| cmp_keys(&a.group, &b.group))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Array, Float64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema};
    use mfq_common::MfqError;
    use mfq_storage::{DatasetHandle, MemoryTableStore, StoredLayout, TableStore};

    use super::{aggregate, aggregate_to_batch, AggregationSpec, MetricValue, Predicate};
    use crate::scalar::ScalarValue;

    fn load(store: &MemoryTableStore, groups: Vec<&str>, values: Vec<Option<f64>>) -> DatasetHandle {
        let schema = Arc::new(Schema::new(vec![
            Field::new("map", DataType::Utf8, true),
            Field::new("kills", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(groups)),
                Arc::new(Float64Array::from(values)),
            ],
        )
        .expect("batch");
        let split = batch.num_rows() / 2;
        let parts = vec![
            vec![batch.slice(0, split)],
            vec![batch.slice(split, batch.num_rows() - split)],
        ];
        let meta = store
            .write_table("facts", schema, StoredLayout::Unpartitioned, parts)
            .expect("write");
        DatasetHandle::from_meta(&meta)
    }

    #[test]
    fn average_and_count_of_one_group() {
        let store = MemoryTableStore::new();
        let h = load(&store, vec!["A", "A", "A"], vec![Some(5.0), Some(10.0), Some(15.0)]);
        let avg = aggregate(&store, &h, &AggregationSpec::average(&["map"], "kills", "avg"))
            .expect("avg");
        assert_eq!(avg.len(), 1);
        assert_eq!(avg[0].value, MetricValue::Average(Some(10.0)));

        let count = aggregate(&store, &h, &AggregationSpec::count(&["map"], "kills", "n"))
            .expect("count");
        assert_eq!(count[0].value, MetricValue::Count(3));
    }

    #[test]
    fn groups_rank_descending_with_key_tie_break() {
        let store = MemoryTableStore::new();
        let h = load(
            &store,
            vec!["C", "A", "B", "B", "D"],
            vec![Some(5.0), Some(10.0), Some(20.0), Some(30.0), Some(10.0)],
        );
        let rows = aggregate(&store, &h, &AggregationSpec::average(&["map"], "kills", "avg"))
            .expect("avg");
        let order = rows
            .iter()
            .map(|r| r.group[0].to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["B", "A", "D", "C"]);
    }

    #[test]
    fn all_null_group_averages_to_null_and_ranks_last() {
        let store = MemoryTableStore::new();
        let h = load(&store, vec!["A", "B", "B"], vec![Some(1.0), None, None]);
        let spec = AggregationSpec::average(&["map"], "kills", "avg");
        let rows = aggregate(&store, &h, &spec).expect("avg");
        assert_eq!(rows[0].group, vec![ScalarValue::utf8("A")]);
        assert_eq!(rows[1].value, MetricValue::Average(None));

        let batch = aggregate_to_batch(&h, &spec, &rows).expect("batch");
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(1).name(), "avg");
        assert!(batch.column(1).is_null(1));
    }

    #[test]
    fn filter_applies_before_grouping_and_limit_after_sorting() {
        let store = MemoryTableStore::new();
        let h = load(
            &store,
            vec!["A", "B", "B", "C", "C", "C"],
            vec![Some(1.0), Some(2.0), Some(2.0), Some(3.0), Some(3.0), Some(9.0)],
        );
        let spec = AggregationSpec::count(&["map"], "kills", "n")
            .with_filter(Predicate::eq("kills", ScalarValue::float(3.0)))
            .with_limit(1);
        let rows = aggregate(&store, &h, &spec).expect("count");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group, vec![ScalarValue::utf8("C")]);
        assert_eq!(rows[0].value, MetricValue::Count(2));
    }

    #[test]
    fn averaging_text_is_a_schema_mismatch() {
        let store = MemoryTableStore::new();
        let h = load(&store, vec!["A"], vec![Some(1.0)]);
        let err = aggregate(&store, &h, &AggregationSpec::average(&["kills"], "map", "avg"))
            .expect_err("text");
        assert!(matches!(err, MfqError::SchemaMismatch(_)));
    }

    #[test]
    fn filter_value_of_another_type_is_a_schema_mismatch() {
        let store = MemoryTableStore::new();
        let h = load(&store, vec!["A", "B"], vec![Some(1.0), Some(2.0)]);
        let spec = AggregationSpec::count(&["map"], "kills", "n")
            .with_filter(Predicate::eq("map", ScalarValue::Int64(1)));
        let err = aggregate(&store, &h, &spec).expect_err("int against text");
        assert!(matches!(err, MfqError::SchemaMismatch(_)));

        let spec = AggregationSpec::count(&["map"], "kills", "n")
            .with_filter(Predicate::eq("kills", ScalarValue::Int64(2)));
        let rows = aggregate(&store, &h, &spec).expect("int against float");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group, vec![ScalarValue::utf8("B")]);
    }
}
