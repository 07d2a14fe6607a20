//! Redistribute a dataset into output shards and publish them as one directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use mfq_common::{MfqError, Result};
use mfq_execution::{
    bucket_for, cmp_scalar, read_table_rows, rows_to_batch, try_units, ScalarValue,
};
use mfq_storage::commit::{create_staging_dir, discard_staging_dir, replace_dir_atomically};
use mfq_storage::{DatasetHandle, TableStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::layout::{PartitionManifest, PartitionScheme, ShardMeta};
use crate::writer::{write_manifest, ShardWriter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub partition_count: u32,
    /// Hash-route on this column; round-robin when absent.
    pub key: Option<String>,
}

impl PartitionSpec {
    pub fn by_key(partition_count: u32, key: impl Into<String>) -> Self {
        Self {
            partition_count,
            key: Some(key.into()),
        }
    }

    pub fn round_robin(partition_count: u32) -> Self {
        Self {
            partition_count,
            key: None,
        }
    }

    fn scheme(&self) -> PartitionScheme {
        match &self.key {
            Some(key) => PartitionScheme::Hash { key: key.clone() },
            None => PartitionScheme::RoundRobin,
        }
    }
}

/// Outcome of a published write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionWriteReport {
    pub destination: PathBuf,
    pub shards: Vec<ShardMeta>,
    pub rows: u64,
    pub bytes: u64,
}

/// Split `dataset` per `spec` and publish the shards at `destination`.
///
/// Shards are written in parallel into a staging directory beside
/// `destination`. The destination is replaced only after every shard and the
/// manifest are on disk; on any failure it is left untouched.
pub fn partition_and_write(
    store: &dyn TableStore,
    dataset: &DatasetHandle,
    spec: &PartitionSpec,
    destination: &Path,
    writer: &dyn ShardWriter,
) -> Result<PartitionWriteReport> {
    if spec.partition_count == 0 {
        return Err(MfqError::InvalidConfig(
            "partition_count must be greater than zero".to_string(),
        ));
    }
    let schema = dataset.schema();
    let key_idx = match &spec.key {
        Some(key) => Some(schema.index_of(key).map_err(|_| {
            MfqError::SchemaMismatch(format!(
                "partition key '{key}' missing from '{}'",
                dataset.name()
            ))
        })?),
        None => None,
    };

    let started = Instant::now();
    let rows = read_table_rows(store, dataset.name())?;
    let total_rows = rows.len() as u64;
    let shards = redistribute(rows, spec.partition_count, key_idx)
        .iter()
        .map(|rows| {
            if rows.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![rows_to_batch(&schema, rows)?])
            }
        })
        .collect::<Result<Vec<Vec<RecordBatch>>>>()?;

    let staged = create_staging_dir(destination)?;
    let (metas, failures) = try_units(spec.partition_count, |shard| {
        writer.write_shard(&staged, shard, schema.as_ref(), &shards[shard as usize])
    });
    if !failures.is_empty() {
        discard_staging_dir(&staged);
        warn!(
            dataset = dataset.name(),
            destination = %destination.display(),
            failed = failures.len(),
            "partition write failed; destination left untouched"
        );
        return Err(MfqError::PartitionWriteFailure {
            destination: destination.display().to_string(),
            failures,
        });
    }

    let manifest = PartitionManifest {
        dataset: dataset.name().to_string(),
        scheme: spec.scheme(),
        partition_count: spec.partition_count,
        schema: schema.as_ref().clone(),
        shards: metas,
        total_rows,
    };
    let published = write_manifest(&staged, &manifest)
        .and_then(|_| replace_dir_atomically(&staged, destination));
    if let Err(e) = published {
        discard_staging_dir(&staged);
        return Err(e);
    }

    let bytes: u64 = manifest.shards.iter().map(|s| s.bytes).sum();
    info!(
        dataset = dataset.name(),
        destination = %destination.display(),
        scheme = ?manifest.scheme,
        partitions = spec.partition_count,
        rows = total_rows,
        bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "partitioned output published"
    );
    Ok(PartitionWriteReport {
        destination: destination.to_path_buf(),
        shards: manifest.shards,
        rows: total_rows,
        bytes,
    })
}

fn redistribute(
    rows: Vec<Vec<ScalarValue>>,
    partitions: u32,
    key_idx: Option<usize>,
) -> Vec<Vec<Vec<ScalarValue>>> {
    let mut out = vec![Vec::new(); partitions as usize];
    match key_idx {
        Some(k) => {
            for row in rows {
                let shard = bucket_for(std::slice::from_ref(&row[k]), partitions);
                out[shard as usize].push(row);
            }
            for shard in &mut out {
                shard.sort_by(|a, b| cmp_scalar(&a[k], &b[k]));
            }
        }
        None => {
            for (i, row) in rows.into_iter().enumerate() {
                out[i % partitions as usize].push(row);
            }
        }
    }
    out
}
