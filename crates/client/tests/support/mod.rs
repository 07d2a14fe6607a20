#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::record_batch::RecordBatch;
use mfq_common::EngineConfig;
use mfq_execution::{cmp_keys, rows_from_batches, ScalarValue};

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}_{nanos}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn write_csv(dir: &Path, table: &str, contents: &str) -> PathBuf {
    let path = dir.join(format!("{table}.csv"));
    fs::write(&path, contents).expect("write csv");
    path
}

/// Small config so every stage has several parts to run in parallel.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        bucket_count: 4,
        output_partitions: 2,
        shuffle_partitions: 4,
        worker_threads: 2,
        batch_size_rows: 2,
        ..EngineConfig::default()
    }
}

/// Five matches over three maps; Alpine is played three times.
pub fn write_match_fixture(dir: &Path) {
    write_csv(
        dir,
        "matches",
        "match_id,map,playlist\n\
         m1,Alpine,Arena\n\
         m2,Orion,Arena\n\
         m3,Alpine,Team Slayer\n\
         m4,Plaza,Big Team\n\
         m5,Alpine,Arena\n",
    );
    write_csv(
        dir,
        "match_details",
        "match_id,player_id,kills\n\
         m1,p1,10\n\
         m2,p2,4\n\
         m3,p1,8\n\
         m4,p3,12\n\
         m5,p2,6\n",
    );
    write_csv(
        dir,
        "medals_matches_players",
        "match_id,player_id,medal_id,count\n\
         m1,p1,100,2\n\
         m2,p2,101,1\n\
         m3,p1,100,1\n\
         m4,p3,102,3\n\
         m5,p2,100,1\n",
    );
    write_csv(
        dir,
        "medals",
        "medal_id,medal_name\n\
         100,Killing Spree\n\
         101,Headshot\n\
         102,Double Kill\n",
    );
}

pub fn sorted_rows(batches: &[RecordBatch]) -> Vec<Vec<ScalarValue>> {
    let mut rows = rows_from_batches(batches).expect("decode rows");
    rows.sort_by(|a, b| cmp_keys(a, b));
    rows
}

/// `(group, metric)` pairs of a two-column query result, in result order.
pub fn ranked_pairs(batch: &RecordBatch) -> Vec<(String, String)> {
    rows_from_batches(std::slice::from_ref(batch))
        .expect("decode rows")
        .into_iter()
        .map(|row| (row[0].to_string(), row[1].to_string()))
        .collect()
}
