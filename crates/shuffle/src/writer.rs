use std::fs;
use std::path::Path;

use arrow::record_batch::RecordBatch;
use arrow_schema::Schema;
use mfq_common::{MfqError, Result};
use mfq_storage::write_parquet_file;

use crate::layout::{manifest_path, shard_file_name, PartitionManifest, ShardMeta};

/// Writes one output shard into a staging directory.
///
/// Implementations must not touch anything outside `dir`; the partitioner owns
/// publishing and cleanup.
pub trait ShardWriter: Send + Sync {
    fn write_shard(
        &self,
        dir: &Path,
        shard: u32,
        schema: &Schema,
        batches: &[RecordBatch],
    ) -> Result<ShardMeta>;
}

/// Default shard format: one snappy-compressed parquet file per shard.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetShardWriter;

impl ShardWriter for ParquetShardWriter {
    fn write_shard(
        &self,
        dir: &Path,
        shard: u32,
        schema: &Schema,
        batches: &[RecordBatch],
    ) -> Result<ShardMeta> {
        let file = shard_file_name(shard);
        let bytes = write_parquet_file(&dir.join(&file), schema, batches)?;
        Ok(ShardMeta {
            shard,
            file,
            rows: batches.iter().map(|b| b.num_rows() as u64).sum(),
            bytes,
        })
    }
}

pub fn write_manifest(dir: &Path, manifest: &PartitionManifest) -> Result<()> {
    let payload = serde_json::to_vec_pretty(manifest)
        .map_err(|e| MfqError::Execution(format!("manifest encode failed: {e}")))?;
    fs::write(manifest_path(dir), payload)?;
    Ok(())
}
