//! The match telemetry job: load four tables, lay them out for co-partitioned
//! and replicated joins, build one fact table, rank it four ways, and write it
//! under three output layouts.

use std::collections::HashMap;
use std::path::PathBuf;

use arrow::record_batch::RecordBatch;
use mfq_common::Result;
use mfq_execution::{AggregationSpec, Predicate, ScalarValue};
use mfq_planner::{explain_join, JoinPlannerConfig, JoinSpec, PlannedJoin, PlanningContext};
use mfq_shuffle::{PartitionSpec, PartitionWriteReport};
use mfq_storage::{CsvSource, DatasetHandle, Layout, StoredLayout, TableStore};
use tracing::info;

use crate::engine::Engine;

pub const MATCH_DETAILS: &str = "match_details";
pub const MATCHES: &str = "matches";
pub const MEDALS_MATCHES_PLAYERS: &str = "medals_matches_players";
pub const MEDALS: &str = "medals";
pub const FACT_TABLE: &str = "match_facts";

pub const MATCH_ID: &str = "match_id";
pub const PLAYER_ID: &str = "player_id";
pub const MEDAL_ID: &str = "medal_id";
pub const KILLS: &str = "kills";
pub const PLAYLIST: &str = "playlist";
pub const MAP: &str = "map";
pub const MEDAL_NAME: &str = "medal_name";

/// Rows kept per printed query result.
pub const TOP_N: usize = 10;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Directory holding `<table>.csv` for each of the four inputs.
    pub input_dir: PathBuf,
    /// Parent of the three partitioned output directories.
    pub output_dir: PathBuf,
    /// Plan the joins only; no bucketing, joining, or output writes.
    pub explain_only: bool,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub title: &'static str,
    pub batch: RecordBatch,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// One rendered plan line per join, in execution order.
    pub plans: Vec<String>,
    pub fact: Option<DatasetHandle>,
    pub queries: Vec<QueryResult>,
    pub outputs: Vec<PartitionWriteReport>,
}

/// The four ranked queries over the fact table.
pub fn match_queries() -> Vec<(&'static str, AggregationSpec)> {
    vec![
        (
            "Player with the most average kills per game",
            AggregationSpec::average(&[PLAYER_ID], KILLS, "avg_kills").with_limit(TOP_N),
        ),
        (
            "Most played playlist",
            AggregationSpec::count(&[PLAYLIST], MATCH_ID, "match_count").with_limit(TOP_N),
        ),
        (
            "Most played map",
            AggregationSpec::count(&[MAP], MATCH_ID, "match_count").with_limit(TOP_N),
        ),
        (
            "Maps with the most Killing Spree medals",
            AggregationSpec::count(&[MAP], MEDAL_ID, "killing_spree_count")
                .with_filter(Predicate::eq(MEDAL_NAME, ScalarValue::utf8("Killing Spree")))
                .with_limit(TOP_N),
        ),
    ]
}

/// Output directory name and redistribution for each published layout.
pub fn output_layouts(partitions: u32) -> Vec<(&'static str, PartitionSpec)> {
    vec![
        (
            "partitioned_by_playlist",
            PartitionSpec::by_key(partitions, PLAYLIST),
        ),
        ("partitioned_by_map", PartitionSpec::by_key(partitions, MAP)),
        ("partitioned_default", PartitionSpec::round_robin(partitions)),
    ]
}

fn bucketed_name(table: &str) -> String {
    format!("bucketed_{table}")
}

pub fn run_match_pipeline(engine: &Engine, opts: &PipelineOptions) -> Result<PipelineReport> {
    let mut loaded = HashMap::new();
    for table in [MATCH_DETAILS, MATCHES, MEDALS_MATCHES_PLAYERS, MEDALS] {
        let source = CsvSource::new(opts.input_dir.join(format!("{table}.csv")));
        loaded.insert(table, engine.load_csv(table, &source)?);
    }
    let medals = engine.mark_broadcast(&loaded[MEDALS]);

    if opts.explain_only {
        return explain_joins(engine, &loaded, medals);
    }

    let bucket_count = engine.config().bucket_count;
    for table in [MATCH_DETAILS, MATCHES, MEDALS_MATCHES_PLAYERS] {
        engine.bucket(&loaded[table], MATCH_ID, bucket_count, &bucketed_name(table))?;
    }
    let details = engine.table(&bucketed_name(MATCH_DETAILS))?;
    let medal_awards = engine.table(&bucketed_name(MEDALS_MATCHES_PLAYERS))?;
    let matches = engine.mark_broadcast(&engine.table(&bucketed_name(MATCHES))?);

    let mut report = PipelineReport::default();
    let fact = join_chain(details, medal_awards, matches, medals, |spec, name| {
        let planned = engine.plan_join(spec)?;
        report.plans.push(explain_join(&planned));
        engine.execute_join(&planned, name)
    })?;
    info!(
        rows = fact.estimated_row_count(),
        layout = %fact.layout(),
        "fact table built"
    );

    for (title, spec) in match_queries() {
        let batch = engine.aggregate_batch(&fact, &spec)?;
        report.queries.push(QueryResult { title, batch });
    }

    for (dir, spec) in output_layouts(engine.config().output_partitions) {
        let destination = opts.output_dir.join(dir);
        report
            .outputs
            .push(engine.partition_and_write(&fact, &spec, &destination)?);
    }
    report.fact = Some(fact);
    Ok(report)
}

/// Joins are applied left to right. The two bucketed tables meet first so the
/// merge join sees both inputs still co-bucketed; the replicated tables follow.
fn join_chain<F>(
    details: DatasetHandle,
    medal_awards: DatasetHandle,
    matches: DatasetHandle,
    medals: DatasetHandle,
    mut step: F,
) -> Result<DatasetHandle>
where
    F: FnMut(JoinSpec, &str) -> Result<DatasetHandle>,
{
    let awarded = step(
        JoinSpec::inner(details, medal_awards, &[MATCH_ID, PLAYER_ID]),
        "details_with_medals",
    )?;
    let with_matches = step(
        JoinSpec::inner(awarded, matches, &[MATCH_ID]),
        "details_with_matches",
    )?;
    step(JoinSpec::inner(with_matches, medals, &[MEDAL_ID]), FACT_TABLE)
}

/// Layout lookups for a dry run: tables the run would have written answer
/// from `pending`, everything else from the store.
struct DryRunContext<'a> {
    store: &'a dyn TableStore,
    pending: HashMap<String, StoredLayout>,
}

impl PlanningContext for DryRunContext<'_> {
    fn stored_layout(&self, table: &str) -> Result<Option<StoredLayout>> {
        match self.pending.get(table) {
            Some(layout) => Ok(Some(layout.clone())),
            None => self.store.stored_layout(table),
        }
    }
}

fn stored_layout_of(layout: &Layout) -> StoredLayout {
    match layout {
        Layout::Bucketed { key, bucket_count } => StoredLayout::Bucketed {
            key: key.clone(),
            bucket_count: *bucket_count,
            sorted_by: Some(key.clone()),
        },
        _ => StoredLayout::Unpartitioned,
    }
}

fn explain_joins(
    engine: &Engine,
    loaded: &HashMap<&str, DatasetHandle>,
    medals: DatasetHandle,
) -> Result<PipelineReport> {
    let mut ctx = DryRunContext {
        store: engine.store(),
        pending: HashMap::new(),
    };
    let bucket_count = engine.config().bucket_count;
    let mut virtual_bucket = |table: &str| {
        let name = bucketed_name(table);
        let layout = Layout::Bucketed {
            key: MATCH_ID.to_string(),
            bucket_count,
        };
        ctx.pending.insert(name.clone(), stored_layout_of(&layout));
        let source = &loaded[table];
        DatasetHandle::new(
            name,
            source.schema(),
            source.estimated_row_count(),
            layout,
        )
    };
    let details = virtual_bucket(MATCH_DETAILS);
    let medal_awards = virtual_bucket(MEDALS_MATCHES_PLAYERS);
    let matches = virtual_bucket(MATCHES).as_broadcast();

    let cfg = JoinPlannerConfig::from(engine.config());
    let mut report = PipelineReport::default();
    join_chain(details, medal_awards, matches, medals, |spec, name| {
        let estimate = spec.left.estimated_row_count();
        let planned = PlannedJoin::new(&ctx, spec, &cfg)?;
        report.plans.push(explain_join(&planned));
        ctx.pending
            .insert(name.to_string(), stored_layout_of(planned.output_layout()));
        Ok(DatasetHandle::new(
            name,
            planned.output_schema(),
            estimate,
            planned.output_layout().clone(),
        ))
    })?;
    Ok(report)
}

