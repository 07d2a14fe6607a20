use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use mfq_common::{EngineConfig, MetricsRegistry, Result};
use mfq_execution::{aggregate, aggregate_to_batch, join_to_table, AggregateRow, AggregationSpec};
use mfq_planner::{explain_join, JoinPlannerConfig, JoinSpec, PlannedJoin};
use mfq_shuffle::{
    bucket, partition_and_write, read_partitioned_output, ParquetShardWriter, PartitionSpec,
    PartitionWriteReport, PartitionedOutput, ShardWriter,
};
use mfq_storage::{
    read_csv, CsvSource, DatasetHandle, MemoryTableStore, ParquetTableStore, StoredLayout,
    TableStore,
};
use tracing::{debug, info};

use crate::session::{Session, SharedSession};

/// Entry point for loading, laying out, joining, aggregating, and writing datasets.
///
/// Every transform returns a new [`DatasetHandle`] registered under its own
/// name; handles are never modified in place.
#[derive(Debug, Clone)]
pub struct Engine {
    session: SharedSession,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn TableStore>) -> Result<Self> {
        let session = Arc::new(Session::new(config, store)?);
        Ok(Self { session })
    }

    /// Engine over a process-local store.
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryTableStore::new()))
    }

    /// Engine over a parquet warehouse rooted at `root`.
    pub fn with_parquet_store(config: EngineConfig, root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(config, Arc::new(ParquetTableStore::new(root)?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.session.config
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.session.metrics
    }

    pub fn store(&self) -> &dyn TableStore {
        self.session.store.as_ref()
    }

    /// Load a delimited file into the store as `name`, one part per read batch.
    pub fn load_csv(&self, name: &str, source: &CsvSource) -> Result<DatasetHandle> {
        let reservation = self.session.registry.reserve(name)?;
        let started = Instant::now();
        let cfg = &self.session.config;
        let (schema, batches) = read_csv(source, cfg.csv_infer_records, cfg.batch_size_rows)?;
        let parts = batches.into_iter().map(|b| vec![b]).collect::<Vec<_>>();
        let meta =
            self.session
                .store
                .write_table(name, schema, StoredLayout::Unpartitioned, parts)?;
        let handle = DatasetHandle::from_meta(&meta);
        reservation.commit(handle.clone())?;
        let secs = started.elapsed().as_secs_f64();
        self.session.metrics.observe_stage("load", secs);
        info!(
            dataset = name,
            path = %source.path.display(),
            rows = meta.stats.rows,
            columns = meta.schema.fields().len(),
            parts = meta.part_count(),
            "dataset loaded"
        );
        Ok(handle)
    }

    /// Registered handle for `name`.
    pub fn dataset(&self, name: &str) -> Result<DatasetHandle> {
        self.session.registry.get(name)
    }

    /// Handle rebuilt from the store's persisted metadata for `name`.
    ///
    /// The layout comes from storage, so a bucketed table read back by name is
    /// still known to be bucketed.
    pub fn table(&self, name: &str) -> Result<DatasetHandle> {
        Ok(DatasetHandle::from_meta(
            &self.session.store.table_meta(name)?,
        ))
    }

    pub fn dataset_names(&self) -> Vec<String> {
        self.session.registry.names()
    }

    /// Copy of `handle` marked for replication in joins.
    pub fn mark_broadcast(&self, handle: &DatasetHandle) -> DatasetHandle {
        debug!(dataset = handle.name(), "marked for broadcast");
        handle.as_broadcast()
    }

    /// Rewrite `handle` into `bucket_count` buckets on `key`, stored as `target`.
    pub fn bucket(
        &self,
        handle: &DatasetHandle,
        key: &str,
        bucket_count: u32,
        target: &str,
    ) -> Result<DatasetHandle> {
        let reservation = self.session.registry.reserve(target)?;
        let started = Instant::now();
        let store = self.store();
        let out = self
            .session
            .pool
            .install(|| bucket(store, handle, key, bucket_count, target))?;
        let stats = self.session.store.table_meta(target)?.stats;
        self.session.metrics.record_bucket_write(
            target,
            stats.rows,
            u64::from(bucket_count),
            stats.bytes,
            started.elapsed().as_secs_f64(),
        );
        reservation.commit(out.clone())?;
        Ok(out)
    }

    /// Plan a join without moving data.
    pub fn plan_join(&self, spec: JoinSpec) -> Result<PlannedJoin> {
        let cfg = JoinPlannerConfig::from(&self.session.config);
        let planned = PlannedJoin::new(self.store(), spec, &cfg)?;
        self.session
            .metrics
            .record_join_plan(planned.plan().strategy_name());
        info!(plan = %explain_join(&planned), "join planned");
        Ok(planned)
    }

    /// Plan and execute a join, persisting the result as `output_name`.
    pub fn join(&self, spec: JoinSpec, output_name: &str) -> Result<DatasetHandle> {
        let planned = self.plan_join(spec)?;
        self.execute_join(&planned, output_name)
    }

    pub fn execute_join(&self, planned: &PlannedJoin, output_name: &str) -> Result<DatasetHandle> {
        let reservation = self.session.registry.reserve(output_name)?;
        let started = Instant::now();
        let store = self.store();
        let out = self
            .session
            .pool
            .install(|| join_to_table(store, planned, output_name))?;
        self.session.metrics.record_join(
            planned.plan().strategy_name(),
            out.estimated_row_count(),
            started.elapsed().as_secs_f64(),
        );
        reservation.commit(out.clone())?;
        Ok(out)
    }

    pub fn aggregate(
        &self,
        handle: &DatasetHandle,
        spec: &AggregationSpec,
    ) -> Result<Vec<AggregateRow>> {
        let started = Instant::now();
        let store = self.store();
        let rows = self
            .session
            .pool
            .install(|| aggregate(store, handle, spec))?;
        self.session
            .metrics
            .observe_stage("aggregate", started.elapsed().as_secs_f64());
        Ok(rows)
    }

    /// Aggregate and render the ranked rows as one batch.
    pub fn aggregate_batch(
        &self,
        handle: &DatasetHandle,
        spec: &AggregationSpec,
    ) -> Result<RecordBatch> {
        let rows = self.aggregate(handle, spec)?;
        aggregate_to_batch(handle, spec, &rows)
    }

    /// Redistribute `handle` per `spec` and publish parquet shards at `destination`.
    pub fn partition_and_write(
        &self,
        handle: &DatasetHandle,
        spec: &PartitionSpec,
        destination: &Path,
    ) -> Result<PartitionWriteReport> {
        self.partition_and_write_with(handle, spec, destination, &ParquetShardWriter)
    }

    pub fn partition_and_write_with(
        &self,
        handle: &DatasetHandle,
        spec: &PartitionSpec,
        destination: &Path,
        writer: &dyn ShardWriter,
    ) -> Result<PartitionWriteReport> {
        let started = Instant::now();
        let store = self.store();
        let report = self
            .session
            .pool
            .install(|| partition_and_write(store, handle, spec, destination, writer))?;
        self.session.metrics.record_partition_write(
            &destination.display().to_string(),
            report.rows,
            report.shards.len() as u64,
            report.bytes,
            started.elapsed().as_secs_f64(),
        );
        Ok(report)
    }

    pub fn read_output(&self, destination: &Path) -> Result<PartitionedOutput> {
        read_partitioned_output(destination)
    }
}
