use std::fmt;

use thiserror::Error;

/// Failure of a single bucket/partition write inside a parallel stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    /// Bucket or partition index.
    pub shard: u32,
    /// Underlying failure message.
    pub reason: String,
}

impl fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {}: {}", self.shard, self.reason)
    }
}

fn join_failures(failures: &[ShardFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Canonical MFQ error taxonomy used across crates.
///
/// Classification guidance:
/// - [`MfqError::SchemaMismatch`] / [`MfqError::LayoutInconsistency`]: planning-time
///   failures raised before any data moves
/// - [`MfqError::BucketWriteFailure`] / [`MfqError::PartitionWriteFailure`]: per-shard IO
///   failures aggregated into one stage-level failure; nothing is published
/// - [`MfqError::Execution`]: runtime decode/encode or data-shape failures
/// - [`MfqError::InvalidConfig`]: config/environment/path contract violations
#[derive(Debug, Error)]
pub enum MfqError {
    /// Invalid or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Join keys absent from a side or type-incompatible between sides.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A dataset handle claims a layout its stored metadata does not back.
    #[error("layout inconsistency: {0}")]
    LayoutInconsistency(String),

    /// Unknown dataset or table name.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// Concurrent or repeated creation of a handle under an existing name.
    #[error("dataset already exists: {0}")]
    Conflict(String),

    /// Other planning failures.
    #[error("planning error: {0}")]
    Planning(String),

    /// One or more buckets failed to persist.
    #[error("bucket write failed for '{dataset}': {}", join_failures(.failures))]
    BucketWriteFailure {
        /// Dataset being bucketed.
        dataset: String,
        /// Every failed bucket, ordered by index.
        failures: Vec<ShardFailure>,
    },

    /// One or more output partitions failed to persist.
    #[error("partition write failed for '{destination}': {}", join_failures(.failures))]
    PartitionWriteFailure {
        /// Output destination path.
        destination: String,
        /// Every failed partition, ordered by index.
        failures: Vec<ShardFailure>,
    },

    /// Runtime execution failures after planning succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a shape this engine deliberately does not run.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard MFQ result alias.
pub type Result<T> = std::result::Result<T, MfqError>;
