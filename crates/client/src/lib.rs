//! Session-level API over the layout, join, aggregation, and output crates,
//! plus the match telemetry job built on it.

pub mod engine;
pub mod pipeline;
pub mod session;

pub use engine::Engine;
pub use pipeline::{
    match_queries, output_layouts, run_match_pipeline, PipelineOptions, PipelineReport,
    QueryResult,
};
pub use session::{Session, SharedSession};
