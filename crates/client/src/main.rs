//! `mfq-pipeline`: run the match telemetry job over a directory of CSV inputs.

use std::path::PathBuf;

use arrow::util::pretty::pretty_format_batches;
use clap::Parser;
use mfq_client::{run_match_pipeline, Engine, PipelineOptions};
use mfq_common::EngineConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mfq-pipeline")]
#[command(about = "Join, rank, and repartition match telemetry")]
struct Cli {
    /// Directory holding match_details.csv, matches.csv, medals_matches_players.csv, medals.csv
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Parent directory of the partitioned outputs
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Persist intermediate tables as parquet under this directory (in memory when absent)
    #[arg(long)]
    warehouse: Option<PathBuf>,

    /// JSON engine configuration; MFQ_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the join plans and exit without moving data
    #[arg(long)]
    explain: bool,

    /// Print metrics in prometheus text format after the run
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_json(path)?,
        None => EngineConfig::default(),
    }
    .with_env_overrides()?;

    let engine = match &cli.warehouse {
        Some(root) => Engine::with_parquet_store(config, root)?,
        None => Engine::in_memory(config)?,
    };
    let report = run_match_pipeline(
        &engine,
        &PipelineOptions {
            input_dir: cli.input_dir,
            output_dir: cli.output_dir,
            explain_only: cli.explain,
        },
    )?;

    for plan in &report.plans {
        println!("{plan}");
    }
    for query in &report.queries {
        println!("{}:", query.title);
        println!("{}", pretty_format_batches(std::slice::from_ref(&query.batch))?);
    }
    for output in &report.outputs {
        println!(
            "wrote {} rows in {} shards ({} bytes) to {}",
            output.rows,
            output.shards.len(),
            output.bytes,
            output.destination.display()
        );
    }
    if cli.metrics {
        print!("{}", engine.metrics().render_prometheus());
    }
    Ok(())
}
