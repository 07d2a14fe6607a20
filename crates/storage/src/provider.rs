use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use arrow_schema::{Schema, SchemaRef};
use mfq_common::{MfqError, Result};
use serde::{Deserialize, Serialize};

use crate::stats::TableStats;

/// Physical layout recorded by the store next to a table's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredLayout {
    /// Parts carry no key placement guarantee.
    Unpartitioned,
    /// Part `i` holds exactly the rows whose key hashes to bucket `i`.
    Bucketed {
        key: String,
        bucket_count: u32,
        /// Column each bucket is sorted by, ascending.
        sorted_by: Option<String>,
    },
}

/// Per-part size figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartMeta {
    pub index: u32,
    pub rows: u64,
    pub bytes: u64,
}

/// Everything the store knows about a table without reading its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub schema: Schema,
    pub layout: StoredLayout,
    pub parts: Vec<PartMeta>,
    pub stats: TableStats,
}

impl TableMeta {
    pub fn new(
        name: impl Into<String>,
        schema: &Schema,
        layout: StoredLayout,
        parts: Vec<PartMeta>,
    ) -> Self {
        let stats = TableStats {
            rows: parts.iter().map(|p| p.rows).sum(),
            bytes: parts.iter().map(|p| p.bytes).sum(),
        };
        Self {
            name: name.into(),
            schema: schema.clone(),
            layout,
            parts,
            stats,
        }
    }

    pub fn schema_ref(&self) -> SchemaRef {
        Arc::new(self.schema.clone())
    }

    pub fn part_count(&self) -> u32 {
        self.parts.len() as u32
    }
}

/// Storage capability interface the planning/layout core depends on.
///
/// Implementations must persist layout metadata together with the data so that
/// a later reader can ask "is this table bucketed, by what key, into how many
/// buckets" before planning a join. `write_table` fully replaces any previous
/// table of the same name and publishes nothing when any part fails.
pub trait TableStore: Send + Sync {
    /// Schema, layout, and stats for `table`.
    fn table_meta(&self, table: &str) -> Result<TableMeta>;

    /// Rows of one part (bucket `part` for bucketed tables).
    fn read_part(&self, table: &str, part: u32) -> Result<Vec<RecordBatch>>;

    /// Persist `parts` as `table` with the given layout metadata.
    ///
    /// # Errors
    /// Per-part failures are aggregated; for bucketed layouts the error is
    /// [`MfqError::BucketWriteFailure`].
    fn write_table(
        &self,
        table: &str,
        schema: SchemaRef,
        layout: StoredLayout,
        parts: Vec<Vec<RecordBatch>>,
    ) -> Result<TableMeta>;

    /// Remove `table`; returns whether it existed.
    fn drop_table(&self, table: &str) -> Result<bool>;

    /// Stored table names, sorted.
    fn table_names(&self) -> Result<Vec<String>>;

    fn contains(&self, table: &str) -> bool {
        self.table_meta(table).is_ok()
    }

    fn read_schema(&self, table: &str) -> Result<SchemaRef> {
        Ok(self.table_meta(table)?.schema_ref())
    }

    fn read_layout(&self, table: &str) -> Result<StoredLayout> {
        Ok(self.table_meta(table)?.layout)
    }

    /// All parts concatenated in part order.
    fn read_all(&self, table: &str) -> Result<Vec<RecordBatch>> {
        let meta = self.table_meta(table)?;
        let mut out = Vec::new();
        for part in 0..meta.part_count() {
            out.extend(self.read_part(table, part)?);
        }
        Ok(out)
    }
}

/// Table names become directory names; keep them to a safe alphabet.
pub fn validate_table_name(table: &str) -> Result<()> {
    let ok = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !table.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(MfqError::InvalidConfig(format!("invalid table name: '{table}'")))
    }
}

pub(crate) fn batches_bytes(batches: &[RecordBatch]) -> u64 {
    batches
        .iter()
        .map(|b| b.get_array_memory_size() as u64)
        .sum()
}

pub(crate) fn batches_rows(batches: &[RecordBatch]) -> u64 {
    batches.iter().map(|b| b.num_rows() as u64).sum()
}

#[cfg(test)]
mod tests {
    use super::validate_table_name;

    #[test]
    fn rejects_path_like_names() {
        assert!(validate_table_name("bucketed_matches").is_ok());
        assert!(validate_table_name("fact.v2").is_ok());
        assert!(validate_table_name("../etc").is_err());
        assert!(validate_table_name("a/b").is_err());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name(".hidden").is_err());
    }
}
