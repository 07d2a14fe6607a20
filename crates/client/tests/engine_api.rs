use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use arrow::record_batch::RecordBatch;
use arrow_schema::Schema;
use mfq_client::Engine;
use mfq_common::{EngineConfig, MfqError, Result};
use mfq_execution::AggregationSpec;
use mfq_planner::{JoinPlan, JoinSpec};
use mfq_shuffle::{read_partitioned_output, PartitionSpec, ShardMeta, ShardWriter};
use mfq_storage::{CsvSource, Layout};

mod support;

fn load_fixture(engine: &Engine, dir: &Path) {
    support::write_match_fixture(dir);
    for table in ["match_details", "matches", "medals_matches_players", "medals"] {
        engine
            .load_csv(table, &CsvSource::new(dir.join(format!("{table}.csv"))))
            .expect("load");
    }
}

#[test]
fn loading_the_same_name_twice_conflicts() {
    let dir = support::unique_temp_dir("mfq_engine_conflict");
    let engine = Engine::in_memory(support::test_config()).expect("engine");
    load_fixture(&engine, &dir);
    let err = engine
        .load_csv("matches", &CsvSource::new(dir.join("matches.csv")))
        .expect_err("duplicate");
    assert!(matches!(err, MfqError::Conflict(_)));
    assert_eq!(
        engine.dataset_names(),
        vec!["match_details", "matches", "medals", "medals_matches_players"]
    );
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn racing_loads_of_one_name_leave_a_handle_matching_storage() {
    let dir = support::unique_temp_dir("mfq_engine_race");
    let first = support::write_csv(&dir, "first", "match_id,map\nm1,Alpine\nm2,Orion\n");
    let second = support::write_csv(
        &dir,
        "second",
        "medal_id,medal_name,extra\n100,Killing Spree,x\n101,Headshot,y\n102,Double Kill,z\n",
    );

    for _ in 0..50 {
        let engine = Engine::in_memory(support::test_config()).expect("engine");
        let barrier = Arc::new(Barrier::new(2));
        let racers = [first.clone(), second.clone()]
            .into_iter()
            .map(|path| {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.load_csv("t", &CsvSource::new(path))
                })
            })
            .collect::<Vec<_>>();
        let results = racers
            .into_iter()
            .map(|t| t.join().expect("racer"))
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(MfqError::Conflict(_)))));
        let registered = engine.dataset("t").expect("registered");
        let stored = engine.table("t").expect("stored");
        assert_eq!(registered.schema(), stored.schema());
        assert_eq!(
            registered.estimated_row_count(),
            stored.estimated_row_count()
        );
    }
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn unbucketed_join_is_flagged_or_refused() {
    let dir = support::unique_temp_dir("mfq_engine_fallback");
    let engine = Engine::in_memory(support::test_config()).expect("engine");
    load_fixture(&engine, &dir);
    let details = engine.dataset("match_details").expect("details");
    let matches = engine.dataset("matches").expect("matches");

    let planned = engine
        .plan_join(JoinSpec::inner(details.clone(), matches.clone(), &["match_id"]))
        .expect("plan");
    assert_eq!(planned.plan(), &JoinPlan::ShuffleHashJoin { partitions: 4 });
    let joined = engine.execute_join(&planned, "details_matches").expect("join");
    assert_eq!(joined.estimated_row_count(), 5);
    assert_eq!(joined.layout(), &Layout::Unpartitioned);
    assert!(engine
        .metrics()
        .render_prometheus()
        .contains("strategy=\"shuffle_hash\""));

    let strict = Engine::in_memory(EngineConfig {
        allow_shuffle_fallback: false,
        ..support::test_config()
    })
    .expect("engine");
    let dir2 = support::unique_temp_dir("mfq_engine_strict");
    load_fixture(&strict, &dir2);
    let err = strict
        .plan_join(JoinSpec::inner(
            strict.dataset("match_details").expect("details"),
            strict.dataset("matches").expect("matches"),
            &["match_id"],
        ))
        .expect_err("no fallback");
    assert!(matches!(err, MfqError::Unsupported(_)));
    let _ = fs::remove_dir_all(dir);
    let _ = fs::remove_dir_all(dir2);
}

#[test]
fn a_bucketing_claim_without_stored_buckets_is_rejected() {
    let dir = support::unique_temp_dir("mfq_engine_claim");
    let engine = Engine::in_memory(support::test_config()).expect("engine");
    load_fixture(&engine, &dir);
    let claimed = engine
        .dataset("match_details")
        .expect("details")
        .with_layout(Layout::Bucketed {
            key: "match_id".to_string(),
            bucket_count: 4,
        });
    let awards = engine
        .bucket(
            &engine.dataset("medals_matches_players").expect("awards"),
            "match_id",
            4,
            "bucketed_awards",
        )
        .expect("bucket");
    let err = engine
        .plan_join(JoinSpec::inner(claimed, awards, &["match_id", "player_id"]))
        .expect_err("unbacked claim");
    assert!(matches!(err, MfqError::LayoutInconsistency(_)));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn threshold_broadcasts_small_tables_without_markers() {
    let dir = support::unique_temp_dir("mfq_engine_threshold");
    let engine = Engine::in_memory(EngineConfig {
        broadcast_threshold_rows: 4,
        ..support::test_config()
    })
    .expect("engine");
    load_fixture(&engine, &dir);
    let planned = engine
        .plan_join(JoinSpec::inner(
            engine.dataset("medals_matches_players").expect("awards"),
            engine.dataset("medals").expect("medals"),
            &["medal_id"],
        ))
        .expect("plan");
    assert!(matches!(planned.plan(), JoinPlan::BroadcastJoin { .. }));
    let joined = engine.execute_join(&planned, "awards_named").expect("join");
    let spree = engine
        .aggregate(
            &joined,
            &AggregationSpec::count(&["medal_name"], "medal_id", "n"),
        )
        .expect("aggregate");
    assert_eq!(spree[0].group[0].to_string(), "Killing Spree");
    let _ = fs::remove_dir_all(dir);
}

struct RejectingWriter;

impl ShardWriter for RejectingWriter {
    fn write_shard(
        &self,
        _dir: &Path,
        shard: u32,
        _schema: &Schema,
        _batches: &[RecordBatch],
    ) -> Result<ShardMeta> {
        Err(MfqError::Execution(format!("shard {shard} rejected")))
    }
}

#[test]
fn failed_output_write_keeps_the_previous_run() {
    let dir = support::unique_temp_dir("mfq_engine_output");
    let engine = Engine::in_memory(support::test_config()).expect("engine");
    load_fixture(&engine, &dir);
    let matches = engine.dataset("matches").expect("matches");
    let dest = dir.join("output").join("by_map");

    engine
        .partition_and_write(&matches, &PartitionSpec::by_key(2, "map"), &dest)
        .expect("first write");
    let err = engine
        .partition_and_write_with(
            &matches,
            &PartitionSpec::round_robin(3),
            &dest,
            &RejectingWriter,
        )
        .expect_err("all shards fail");
    match err {
        MfqError::PartitionWriteFailure { failures, .. } => assert_eq!(failures.len(), 3),
        other => panic!("unexpected error: {other}"),
    }
    let out = read_partitioned_output(&dest).expect("previous output");
    assert_eq!(out.manifest.partition_count, 2);
    assert_eq!(out.total_rows(), 5);
    let _ = fs::remove_dir_all(dir);
}
