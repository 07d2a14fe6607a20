//! Parallel stage runner: one closure per unit (part, bucket, shard) on the
//! current rayon pool, with every unit failure folded into one stage error.

use mfq_common::{MfqError, Result, ShardFailure};
use mfq_storage::TableStore;
use rayon::prelude::*;

use crate::scalar::{rows_from_batches, ScalarValue};

/// Run `f` for units `0..units` and return results in unit order.
///
/// Fails with [`MfqError::Execution`] naming every failed unit when any unit fails.
pub fn run_units<T, F>(stage: &str, units: u32, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(u32) -> Result<T> + Sync + Send,
{
    let (ok, failures) = try_units(units, f);
    if failures.is_empty() {
        return Ok(ok);
    }
    Err(stage_error(stage, &failures))
}

/// Like [`run_units`] but hands back the raw failures for callers that map them
/// to a typed error.
pub fn try_units<T, F>(units: u32, f: F) -> (Vec<T>, Vec<ShardFailure>)
where
    T: Send,
    F: Fn(u32) -> Result<T> + Sync + Send,
{
    let results = (0..units)
        .into_par_iter()
        .map(|unit| (unit, f(unit)))
        .collect::<Vec<_>>();
    let mut ok = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (unit, res) in results {
        match res {
            Ok(v) => ok.push(v),
            Err(e) => failures.push(ShardFailure {
                shard: unit,
                reason: e.to_string(),
            }),
        }
    }
    (ok, failures)
}

pub fn stage_error(stage: &str, failures: &[ShardFailure]) -> MfqError {
    let detail = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    MfqError::Execution(format!(
        "{stage} failed in {} unit(s): {detail}",
        failures.len()
    ))
}

/// Rows of one stored part.
pub fn read_part_rows(
    store: &dyn TableStore,
    table: &str,
    part: u32,
) -> Result<Vec<Vec<ScalarValue>>> {
    rows_from_batches(&store.read_part(table, part)?)
}

/// Rows of every stored part of `table`, read in parallel, concatenated in part order.
pub fn read_table_rows(store: &dyn TableStore, table: &str) -> Result<Vec<Vec<ScalarValue>>> {
    let parts = store.table_meta(table)?.part_count();
    let chunks = run_units(&format!("read '{table}'"), parts, |p| {
        read_part_rows(store, table, p)
    })?;
    Ok(chunks.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use mfq_common::MfqError;

    use super::run_units;

    #[test]
    fn results_keep_unit_order() {
        let out = run_units("square", 8, |u| Ok(u * u)).expect("stage");
        assert_eq!(out, vec![0, 1, 4, 9, 16, 25, 36, 49]);
    }

    #[test]
    fn failure_names_the_unit() {
        let err = run_units("probe", 4, |u| {
            if u == 2 {
                Err(MfqError::Execution("disk gone".to_string()))
            } else {
                Ok(u)
            }
        })
        .expect_err("unit 2 fails");
        let msg = err.to_string();
        assert!(msg.contains("probe failed in 1 unit(s)"), "{msg}");
        assert!(msg.contains("shard 2: execution error: disk gone"), "{msg}");
    }
}
