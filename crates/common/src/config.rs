use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MfqError, Result};

/// Engine-wide knobs shared by planner, bucketing, and output stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Datasets with fewer estimated rows than this are broadcast automatically.
    /// `0` disables automatic broadcast; only explicit markers apply.
    pub broadcast_threshold_rows: u64,
    /// Bucket count used when bucketing large inputs on the join key.
    pub bucket_count: u32,
    /// Shard count for partitioned output writes.
    pub output_partitions: u32,
    /// Partition count for the shuffle-join fallback.
    pub shuffle_partitions: u32,
    /// When false, a join that is neither broadcast nor co-bucketed fails planning.
    pub allow_shuffle_fallback: bool,
    /// Worker threads for data-parallel stages; `0` uses the rayon default.
    pub worker_threads: usize,
    /// Records sampled when inferring CSV schemas.
    pub csv_infer_records: usize,
    /// Target rows per record batch when reading delimited input.
    pub batch_size_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            broadcast_threshold_rows: 0,
            bucket_count: 16,
            output_partitions: 4,
            shuffle_partitions: 16,
            allow_shuffle_fallback: true,
            worker_threads: 0,
            csv_infer_records: 1000,
            batch_size_rows: 8192,
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file; absent fields keep their defaults.
    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Self =
            serde_json::from_str(&s).map_err(|e| MfqError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `MFQ_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<u64>("MFQ_BROADCAST_THRESHOLD_ROWS")? {
            self.broadcast_threshold_rows = v;
        }
        if let Some(v) = env_parse::<u32>("MFQ_BUCKET_COUNT")? {
            self.bucket_count = v;
        }
        if let Some(v) = env_parse::<u32>("MFQ_OUTPUT_PARTITIONS")? {
            self.output_partitions = v;
        }
        if let Some(v) = env_parse::<u32>("MFQ_SHUFFLE_PARTITIONS")? {
            self.shuffle_partitions = v;
        }
        if let Some(v) = env_parse::<bool>("MFQ_ALLOW_SHUFFLE_FALLBACK")? {
            self.allow_shuffle_fallback = v;
        }
        if let Some(v) = env_parse::<usize>("MFQ_WORKER_THREADS")? {
            self.worker_threads = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values that make stages meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 {
            return Err(MfqError::InvalidConfig(
                "bucket_count must be greater than zero".to_string(),
            ));
        }
        if self.output_partitions == 0 {
            return Err(MfqError::InvalidConfig(
                "output_partitions must be greater than zero".to_string(),
            ));
        }
        if self.shuffle_partitions == 0 {
            return Err(MfqError::InvalidConfig(
                "shuffle_partitions must be greater than zero".to_string(),
            ));
        }
        if self.batch_size_rows == 0 {
            return Err(MfqError::InvalidConfig(
                "batch_size_rows must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| MfqError::InvalidConfig(format!("invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"bucket_count": 8, "broadcast_threshold_rows": 500}"#)
                .expect("parse");
        assert_eq!(cfg.bucket_count, 8);
        assert_eq!(cfg.broadcast_threshold_rows, 500);
        assert_eq!(cfg.output_partitions, 4);
        assert!(cfg.allow_shuffle_fallback);
    }

    #[test]
    fn zero_bucket_count_is_rejected() {
        let cfg = EngineConfig {
            bucket_count: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
