//! Dataset handles, the handle registry, and the table-store capability layer.
//!
//! Architecture role:
//! - [`DatasetHandle`] is the immutable logical reference planners reason about
//! - [`TableStore`] is the narrow interface every storage backend implements
//! - [`DatasetRegistry`] maps names to handles inside an explicit context
//!
//! Backends: [`MemoryTableStore`] and [`ParquetTableStore`]. Delimited input is
//! read by [`csv_source`].

pub mod catalog;
pub mod commit;
pub mod csv_source;
pub mod handle;
pub mod memory_store;
pub mod parquet_store;
pub mod provider;
pub mod stats;

pub use catalog::{DatasetRegistry, NameReservation};
pub use csv_source::{read_csv, CsvSource};
pub use handle::{DatasetHandle, Layout};
pub use memory_store::MemoryTableStore;
pub use parquet_store::{part_file_name, read_parquet_file, write_parquet_file, ParquetTableStore};
pub use provider::{PartMeta, StoredLayout, TableMeta, TableStore};
pub use stats::TableStats;
