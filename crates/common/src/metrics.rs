use std::sync::Arc;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Prometheus-backed counters for the planning and layout stages.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    join_plans: CounterVec,
    join_rows_out: CounterVec,
    bucket_rows: CounterVec,
    buckets_written: CounterVec,
    partition_rows: CounterVec,
    partitions_written: CounterVec,
    bytes_written: CounterVec,
    stage_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_join_plan(&self, strategy: &str) {
        self.inner
            .join_plans
            .with_label_values(&[strategy])
            .inc();
    }

    pub fn record_join(&self, strategy: &str, rows_out: u64, secs: f64) {
        self.inner
            .join_rows_out
            .with_label_values(&[strategy])
            .inc_by(rows_out as f64);
        self.inner
            .stage_seconds
            .with_label_values(&["join"])
            .observe(secs.max(0.0));
    }

    pub fn record_bucket_write(&self, dataset: &str, rows: u64, buckets: u64, bytes: u64, secs: f64) {
        self.inner
            .bucket_rows
            .with_label_values(&[dataset])
            .inc_by(rows as f64);
        self.inner
            .buckets_written
            .with_label_values(&[dataset])
            .inc_by(buckets as f64);
        self.inner
            .bytes_written
            .with_label_values(&["bucket"])
            .inc_by(bytes as f64);
        self.inner
            .stage_seconds
            .with_label_values(&["bucket"])
            .observe(secs.max(0.0));
    }

    pub fn record_partition_write(
        &self,
        destination: &str,
        rows: u64,
        partitions: u64,
        bytes: u64,
        secs: f64,
    ) {
        self.inner
            .partition_rows
            .with_label_values(&[destination])
            .inc_by(rows as f64);
        self.inner
            .partitions_written
            .with_label_values(&[destination])
            .inc_by(partitions as f64);
        self.inner
            .bytes_written
            .with_label_values(&["partition"])
            .inc_by(bytes as f64);
        self.inner
            .stage_seconds
            .with_label_values(&["partition"])
            .observe(secs.max(0.0));
    }

    pub fn observe_stage(&self, stage: &str, secs: f64) {
        self.inner
            .stage_seconds
            .with_label_values(&[stage])
            .observe(secs.max(0.0));
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let join_plans = counter_vec(
            &registry,
            "mfq_join_plans_total",
            "Join plans chosen per strategy",
            &["strategy"],
        );
        let join_rows_out = counter_vec(
            &registry,
            "mfq_join_rows_out_total",
            "Rows produced by joins per strategy",
            &["strategy"],
        );
        let bucket_rows = counter_vec(
            &registry,
            "mfq_bucket_rows_total",
            "Rows written by the bucketing layer",
            &["dataset"],
        );
        let buckets_written = counter_vec(
            &registry,
            "mfq_buckets_written_total",
            "Buckets persisted",
            &["dataset"],
        );
        let partition_rows = counter_vec(
            &registry,
            "mfq_partition_rows_total",
            "Rows written by the output partitioner",
            &["destination"],
        );
        let partitions_written = counter_vec(
            &registry,
            "mfq_partitions_written_total",
            "Output partitions persisted",
            &["destination"],
        );
        let bytes_written = counter_vec(
            &registry,
            "mfq_bytes_written_total",
            "Bytes written per stage kind",
            &["kind"],
        );
        let stage_seconds = histogram_vec(
            &registry,
            "mfq_stage_seconds",
            "Wall time per stage",
            &["stage"],
        );

        Self {
            registry,
            join_plans,
            join_rows_out,
            bucket_rows,
            buckets_written,
            partition_rows,
            partitions_written,
            bytes_written,
            stage_seconds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}
