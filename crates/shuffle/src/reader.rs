use std::fs;
use std::path::Path;

use arrow::record_batch::RecordBatch;
use mfq_common::{MfqError, Result};
use mfq_storage::read_parquet_file;

use crate::layout::{manifest_path, PartitionManifest};

/// A published partitioned output read back from disk.
#[derive(Debug, Clone)]
pub struct PartitionedOutput {
    pub manifest: PartitionManifest,
    /// Batches of each shard, in shard order.
    pub shards: Vec<Vec<RecordBatch>>,
}

impl PartitionedOutput {
    pub fn total_rows(&self) -> u64 {
        self.shards
            .iter()
            .flatten()
            .map(|b| b.num_rows() as u64)
            .sum()
    }
}

pub fn read_manifest(dir: &Path) -> Result<PartitionManifest> {
    let path = manifest_path(dir);
    let bytes = fs::read(&path).map_err(|e| {
        MfqError::Execution(format!("manifest read failed: {} ({e})", path.display()))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| MfqError::Execution(format!("manifest decode failed: {e}")))
}

/// Read the manifest and every shard it lists.
///
/// Fails when a shard's row count disagrees with the manifest.
pub fn read_partitioned_output(dir: &Path) -> Result<PartitionedOutput> {
    let manifest = read_manifest(dir)?;
    let mut shards = Vec::with_capacity(manifest.shards.len());
    for shard in &manifest.shards {
        let batches = read_parquet_file(&dir.join(&shard.file))?;
        let rows = batches.iter().map(|b| b.num_rows() as u64).sum::<u64>();
        if rows != shard.rows {
            return Err(MfqError::LayoutInconsistency(format!(
                "shard {} of '{}' holds {rows} rows but the manifest records {}",
                shard.shard,
                dir.display(),
                shard.rows
            )));
        }
        shards.push(batches);
    }
    Ok(PartitionedOutput { manifest, shards })
}
