//! Shared configuration, error types, and observability primitives for MFQ crates.
//!
//! Architecture role:
//! - defines engine configuration passed across layers
//! - provides common [`MfqError`] / [`Result`] contracts
//! - hosts the prometheus-backed metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod metrics;

pub use config::EngineConfig;
pub use error::{MfqError, Result, ShardFailure};
pub use metrics::MetricsRegistry;
