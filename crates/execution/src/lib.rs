//! Row-level execution kernels for planned joins and aggregations.
//!
//! Architecture role:
//! - canonical row/value model over Arrow batches
//! - stable key hashing shared by every layout decision
//! - join executors for broadcast, bucketed-merge, and shuffle-hash plans
//! - partial/merged group-by aggregation
//!
//! Key modules:
//! - [`scalar`]
//! - [`hash`]
//! - [`join`]
//! - [`aggregate`]
//!
//! Parallel stages run on the caller's current rayon pool.

pub mod aggregate;
pub mod hash;
pub mod join;
pub mod scalar;
pub mod stage;

pub use aggregate::{
    aggregate, aggregate_schema, aggregate_to_batch, AggregateRow, AggregationSpec, CompareOp,
    Metric, MetricValue, Predicate, Reducer,
};
pub use hash::{bucket_for, canonical_encoding, stable_hash};
pub use join::{execute_join, join_to_table, JoinOutput};
pub use scalar::{
    cmp_keys, cmp_scalar, key_from_row, resolve_key_indexes, rows_from_batches, rows_to_batch,
    scalar_matches_type, ScalarValue,
};
pub use stage::{read_part_rows, read_table_rows, run_units, stage_error, try_units};
