//! Physical data layout: bucketed tables and partitioned output directories.
//!
//! - [`bucketing`] rewrites a table into hash buckets sorted by key
//! - [`partitioner`] splits a dataset into shards and publishes them with a manifest
//! - [`reader`] reads a published output back

pub mod bucketing;
pub mod layout;
pub mod partitioner;
pub mod reader;
pub mod writer;

pub use bucketing::bucket;
pub use layout::{PartitionManifest, PartitionScheme, ShardMeta, MANIFEST_FILE};
pub use partitioner::{partition_and_write, PartitionSpec, PartitionWriteReport};
pub use reader::{read_manifest, read_partitioned_output, PartitionedOutput};
pub use writer::{ParquetShardWriter, ShardWriter};
