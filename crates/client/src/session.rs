use std::sync::Arc;

use mfq_common::{EngineConfig, MetricsRegistry, MfqError, Result};
use mfq_storage::{DatasetRegistry, TableStore};
use rayon::{ThreadPool, ThreadPoolBuilder};

pub type SharedSession = Arc<Session>;

/// Everything one pipeline run shares: config, storage, handle registry,
/// metrics, and the worker pool parallel stages execute on.
pub struct Session {
    pub config: EngineConfig,
    pub store: Arc<dyn TableStore>,
    pub registry: DatasetRegistry,
    pub metrics: MetricsRegistry,
    pub pool: ThreadPool,
}

impl Session {
    pub fn new(config: EngineConfig, store: Arc<dyn TableStore>) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("mfq-worker-{i}"))
            .build()
            .map_err(|e| MfqError::InvalidConfig(format!("worker pool build failed: {e}")))?;
        Ok(Self {
            config,
            store,
            registry: DatasetRegistry::new(),
            metrics: MetricsRegistry::new(),
            pool,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("datasets", &self.registry.names())
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}
