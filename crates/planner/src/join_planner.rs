use std::collections::HashSet;
use std::fmt;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use mfq_common::{EngineConfig, MfqError, Result};
use mfq_storage::{DatasetHandle, Layout, StoredLayout, TableStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Configuration knobs for join strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPlannerConfig {
    /// A side with fewer estimated rows than this is broadcast; `0` disables.
    pub broadcast_threshold_rows: u64,
    /// Permit the shuffle-join fallback instead of failing planning.
    pub allow_shuffle_fallback: bool,
    /// Partition count handed to the shuffle fallback.
    pub shuffle_partitions: u32,
}

impl Default for JoinPlannerConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for JoinPlannerConfig {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            broadcast_threshold_rows: cfg.broadcast_threshold_rows,
            allow_shuffle_fallback: cfg.allow_shuffle_fallback,
            shuffle_partitions: cfg.shuffle_partitions,
        }
    }
}

/// Layout metadata lookups the planner needs before trusting a `Bucketed` claim.
pub trait PlanningContext {
    /// Persisted layout of `table`, or `None` when the store does not hold it.
    fn stored_layout(&self, table: &str) -> Result<Option<StoredLayout>>;
}

impl<T: TableStore + ?Sized> PlanningContext for T {
    fn stored_layout(&self, table: &str) -> Result<Option<StoredLayout>> {
        match self.read_layout(table) {
            Ok(layout) => Ok(Some(layout)),
            Err(MfqError::UnknownDataset(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
}

/// Side replicated to every worker by a broadcast join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastSide {
    Left,
    Right,
}

/// Two handles joined on equally named key columns.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub left: DatasetHandle,
    pub right: DatasetHandle,
    pub keys: Vec<String>,
    pub kind: JoinKind,
}

impl JoinSpec {
    pub fn inner(left: DatasetHandle, right: DatasetHandle, keys: &[&str]) -> Self {
        Self {
            left,
            right,
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
            kind: JoinKind::Inner,
        }
    }
}

/// Strategy chosen for one join specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPlan {
    /// Replicate `broadcast_side` and probe it from the other side's parts.
    BroadcastJoin { broadcast_side: BroadcastSide },
    /// Join bucket `i` of the left with bucket `i` of the right, no shuffle.
    BucketedMergeJoin { key: String, bucket_count: u32 },
    /// Degraded path: hash-repartition both sides on the join keys first.
    ShuffleHashJoin { partitions: u32 },
}

impl JoinPlan {
    /// Stable label used in logs and metrics.
    pub fn strategy_name(&self) -> &'static str {
        match self {
            JoinPlan::BroadcastJoin { .. } => "broadcast",
            JoinPlan::BucketedMergeJoin { .. } => "bucketed_merge",
            JoinPlan::ShuffleHashJoin { .. } => "shuffle_hash",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, JoinPlan::ShuffleHashJoin { .. })
    }
}

impl fmt::Display for JoinPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinPlan::BroadcastJoin { broadcast_side } => {
                write!(f, "BroadcastJoin(broadcast={broadcast_side:?})")
            }
            JoinPlan::BucketedMergeJoin { key, bucket_count } => {
                write!(f, "BucketedMergeJoin(key={key}, buckets={bucket_count})")
            }
            JoinPlan::ShuffleHashJoin { partitions } => {
                write!(f, "ShuffleHashJoin(partitions={partitions})")
            }
        }
    }
}

/// A join specification frozen together with its plan and derived output metadata.
#[derive(Debug, Clone)]
pub struct PlannedJoin {
    spec: JoinSpec,
    plan: JoinPlan,
    output_schema: SchemaRef,
    output_layout: Layout,
}

impl PlannedJoin {
    pub fn new<C: PlanningContext + ?Sized>(
        ctx: &C,
        spec: JoinSpec,
        cfg: &JoinPlannerConfig,
    ) -> Result<Self> {
        let plan = plan_join(ctx, &spec, cfg)?;
        let output_schema = join_output_schema(&spec)?;
        let output_layout = output_layout(&plan);
        Ok(Self {
            spec,
            plan,
            output_schema,
            output_layout,
        })
    }

    pub fn spec(&self) -> &JoinSpec {
        &self.spec
    }

    pub fn plan(&self) -> &JoinPlan {
        &self.plan
    }

    pub fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    pub fn output_layout(&self) -> &Layout {
        &self.output_layout
    }
}

/// Choose the join strategy for `spec`.
///
/// Decision order:
/// 1. key validation (`SchemaMismatch`) and bucketing-claim validation (`LayoutInconsistency`)
/// 2. broadcast when a side is marked `Broadcast` or under the row threshold
/// 3. bucketed merge when both sides are bucketed on the same join key and bucket count
/// 4. shuffle fallback, logged as degraded, or `Unsupported` when disallowed
pub fn plan_join<C: PlanningContext + ?Sized>(
    ctx: &C,
    spec: &JoinSpec,
    cfg: &JoinPlannerConfig,
) -> Result<JoinPlan> {
    validate_keys(spec)?;
    validate_layout_claim(ctx, &spec.left)?;
    validate_layout_claim(ctx, &spec.right)?;

    if let Some(side) = choose_broadcast_side(&spec.left, &spec.right, cfg) {
        debug!(
            left = spec.left.name(),
            right = spec.right.name(),
            ?side,
            "planned broadcast join"
        );
        return Ok(JoinPlan::BroadcastJoin {
            broadcast_side: side,
        });
    }

    if let (Some((lk, lc)), Some((rk, rc))) =
        (spec.left.layout().bucketing(), spec.right.layout().bucketing())
    {
        let key_is_joined = spec.keys.iter().any(|k| k == lk);
        if lk == rk && key_is_joined && lc == rc {
            debug!(
                left = spec.left.name(),
                right = spec.right.name(),
                key = lk,
                buckets = lc,
                "planned bucketed merge join"
            );
            return Ok(JoinPlan::BucketedMergeJoin {
                key: lk.to_string(),
                bucket_count: lc,
            });
        }
        if lk == rk && key_is_joined {
            warn!(
                left = spec.left.name(),
                right = spec.right.name(),
                left_buckets = lc,
                right_buckets = rc,
                "bucket counts differ; co-partitioned merge is not possible"
            );
        }
    }

    if !cfg.allow_shuffle_fallback {
        return Err(MfqError::Unsupported(format!(
            "join of '{}' ({}) and '{}' ({}) on {:?} requires a shuffle and the fallback is disabled",
            spec.left.name(),
            spec.left.layout(),
            spec.right.name(),
            spec.right.layout(),
            spec.keys
        )));
    }
    warn!(
        left = spec.left.name(),
        right = spec.right.name(),
        keys = ?spec.keys,
        partitions = cfg.shuffle_partitions,
        "no broadcast or co-bucketed layout; falling back to shuffle hash join"
    );
    Ok(JoinPlan::ShuffleHashJoin {
        partitions: cfg.shuffle_partitions,
    })
}

/// Layout of the joined result: bucketed only when both inputs were co-bucketed.
pub fn output_layout(plan: &JoinPlan) -> Layout {
    match plan {
        JoinPlan::BucketedMergeJoin { key, bucket_count } => Layout::Bucketed {
            key: key.clone(),
            bucket_count: *bucket_count,
        },
        _ => Layout::Unpartitioned,
    }
}

/// Output columns: every left column, then right columns minus the join keys.
///
/// A right column whose name collides with a left column is qualified as
/// `<right_dataset>.<column>`.
pub fn join_output_schema(spec: &JoinSpec) -> Result<SchemaRef> {
    let left = spec.left.schema();
    let right = spec.right.schema();
    let keys = spec.keys.iter().map(String::as_str).collect::<HashSet<_>>();
    let mut names = left
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<HashSet<_>>();
    let mut fields = left
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect::<Vec<Field>>();
    for f in right.fields().iter() {
        if keys.contains(f.name().as_str()) {
            continue;
        }
        let name = if names.contains(f.name()) {
            format!("{}.{}", spec.right.name(), f.name())
        } else {
            f.name().clone()
        };
        if !names.insert(name.clone()) {
            return Err(MfqError::SchemaMismatch(format!(
                "column '{name}' is ambiguous in join of '{}' and '{}'",
                spec.left.name(),
                spec.right.name()
            )));
        }
        fields.push(Field::new(name, f.data_type().clone(), f.is_nullable()));
    }
    Ok(std::sync::Arc::new(Schema::new(fields)))
}

fn validate_keys(spec: &JoinSpec) -> Result<()> {
    if spec.keys.is_empty() {
        return Err(MfqError::Planning(format!(
            "join of '{}' and '{}' has no keys",
            spec.left.name(),
            spec.right.name()
        )));
    }
    let mut seen = HashSet::new();
    for key in &spec.keys {
        if !seen.insert(key) {
            return Err(MfqError::Planning(format!("duplicate join key '{key}'")));
        }
        let lt = spec.left.column_type(key).ok_or_else(|| {
            MfqError::SchemaMismatch(format!(
                "join key '{key}' missing from '{}'",
                spec.left.name()
            ))
        })?;
        let rt = spec.right.column_type(key).ok_or_else(|| {
            MfqError::SchemaMismatch(format!(
                "join key '{key}' missing from '{}'",
                spec.right.name()
            ))
        })?;
        let compatible = match (type_class(lt), type_class(rt)) {
            (Some(TypeClass::Temporal), Some(TypeClass::Temporal)) => lt == rt,
            (Some(l), Some(r)) => l == r,
            _ => false,
        };
        if !compatible {
            return Err(MfqError::SchemaMismatch(format!(
                "join key '{key}' has incompatible types: {lt:?} in '{}' vs {rt:?} in '{}'",
                spec.left.name(),
                spec.right.name()
            )));
        }
    }
    Ok(())
}

fn validate_layout_claim<C: PlanningContext + ?Sized>(
    ctx: &C,
    handle: &DatasetHandle,
) -> Result<()> {
    let Some((key, bucket_count)) = handle.layout().bucketing() else {
        return Ok(());
    };
    match ctx.stored_layout(handle.name())? {
        Some(StoredLayout::Bucketed {
            key: stored_key,
            bucket_count: stored_count,
            ..
        }) if stored_key == key && stored_count == bucket_count => Ok(()),
        Some(other) => Err(MfqError::LayoutInconsistency(format!(
            "'{}' claims bucketed({key}, {bucket_count}) but the store records {other:?}",
            handle.name()
        ))),
        None => Err(MfqError::LayoutInconsistency(format!(
            "'{}' claims bucketed({key}, {bucket_count}) but has no stored layout metadata",
            handle.name()
        ))),
    }
}

fn choose_broadcast_side(
    left: &DatasetHandle,
    right: &DatasetHandle,
    cfg: &JoinPlannerConfig,
) -> Option<BroadcastSide> {
    let explicit = (left.layout().is_broadcast(), right.layout().is_broadcast());
    match explicit {
        (true, false) => return Some(BroadcastSide::Left),
        (false, true) => return Some(BroadcastSide::Right),
        (true, true) => return Some(smaller_side(left, right)),
        (false, false) => {}
    }

    let under = |h: &DatasetHandle| h.estimated_row_count() < cfg.broadcast_threshold_rows;
    match (under(left), under(right)) {
        (true, false) => Some(BroadcastSide::Left),
        (false, true) => Some(BroadcastSide::Right),
        (true, true) => Some(smaller_side(left, right)),
        (false, false) => None,
    }
}

fn smaller_side(left: &DatasetHandle, right: &DatasetHandle) -> BroadcastSide {
    if left.estimated_row_count() < right.estimated_row_count() {
        BroadcastSide::Left
    } else {
        BroadcastSide::Right
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeClass {
    Integer,
    Floating,
    Text,
    Boolean,
    /// Dates and timestamps; keys must share the exact type.
    Temporal,
}

fn type_class(dt: &DataType) -> Option<TypeClass> {
    match dt {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Some(TypeClass::Integer),
        DataType::Float32 | DataType::Float64 => Some(TypeClass::Floating),
        DataType::Utf8 | DataType::LargeUtf8 => Some(TypeClass::Text),
        DataType::Boolean => Some(TypeClass::Boolean),
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => {
            Some(TypeClass::Temporal)
        }
        _ => None,
    }
}
