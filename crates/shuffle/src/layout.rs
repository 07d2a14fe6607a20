use std::path::{Path, PathBuf};

use arrow_schema::Schema;
use mfq_storage::part_file_name;
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "_manifest.json";

pub fn shard_file_name(shard: u32) -> String {
    part_file_name(shard)
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// How rows were routed to shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionScheme {
    /// `stable_hash(key) mod partition_count`, rows sorted by key within a shard.
    Hash { key: String },
    /// Row `i` of the input goes to shard `i mod partition_count`.
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMeta {
    pub shard: u32,
    pub file: String,
    pub rows: u64,
    pub bytes: u64,
}

/// Contents of `_manifest.json` at the root of a partitioned output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionManifest {
    pub dataset: String,
    pub scheme: PartitionScheme,
    pub partition_count: u32,
    pub schema: Schema,
    pub shards: Vec<ShardMeta>,
    pub total_rows: u64,
}
