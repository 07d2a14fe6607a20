use std::collections::HashMap;
use std::sync::RwLock;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use mfq_common::{MfqError, Result};

use crate::provider::{
    batches_bytes, batches_rows, validate_table_name, PartMeta, StoredLayout, TableMeta,
    TableStore,
};

#[derive(Debug)]
struct StoredTable {
    meta: TableMeta,
    parts: Vec<Vec<RecordBatch>>,
}

/// Process-local table store; used for tests and for intermediate results
/// that never need to survive the run.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, StoredTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableStore for MemoryTableStore {
    fn table_meta(&self, table: &str) -> Result<TableMeta> {
        self.tables
            .read()
            .expect("memory store lock poisoned")
            .get(table)
            .map(|t| t.meta.clone())
            .ok_or_else(|| MfqError::UnknownDataset(table.to_string()))
    }

    fn read_part(&self, table: &str, part: u32) -> Result<Vec<RecordBatch>> {
        let tables = self.tables.read().expect("memory store lock poisoned");
        let stored = tables
            .get(table)
            .ok_or_else(|| MfqError::UnknownDataset(table.to_string()))?;
        stored.parts.get(part as usize).cloned().ok_or_else(|| {
            MfqError::Execution(format!(
                "part {part} out of range for '{table}' ({} parts)",
                stored.parts.len()
            ))
        })
    }

    fn write_table(
        &self,
        table: &str,
        schema: SchemaRef,
        layout: StoredLayout,
        parts: Vec<Vec<RecordBatch>>,
    ) -> Result<TableMeta> {
        validate_table_name(table)?;
        check_part_count(table, &layout, parts.len())?;
        let part_meta = parts
            .iter()
            .enumerate()
            .map(|(idx, batches)| PartMeta {
                index: idx as u32,
                rows: batches_rows(batches),
                bytes: batches_bytes(batches),
            })
            .collect();
        let meta = TableMeta::new(table, schema.as_ref(), layout, part_meta);
        self.tables.write().expect("memory store lock poisoned").insert(
            table.to_string(),
            StoredTable {
                meta: meta.clone(),
                parts,
            },
        );
        Ok(meta)
    }

    fn drop_table(&self, table: &str) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .expect("memory store lock poisoned")
            .remove(table)
            .is_some())
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut names = self
            .tables
            .read()
            .expect("memory store lock poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}

/// A bucketed table must carry exactly one part per bucket.
pub(crate) fn check_part_count(table: &str, layout: &StoredLayout, parts: usize) -> Result<()> {
    if let StoredLayout::Bucketed { bucket_count, .. } = layout {
        if *bucket_count as usize != parts {
            return Err(MfqError::LayoutInconsistency(format!(
                "table '{table}' declares {bucket_count} buckets but {parts} parts were supplied"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema};
    use mfq_common::MfqError;

    use super::MemoryTableStore;
    use crate::provider::{StoredLayout, TableStore};

    fn batch(values: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).expect("batch")
    }

    #[test]
    fn write_then_read_back_layout_and_parts() {
        let store = MemoryTableStore::new();
        let b0 = batch(vec![1, 2]);
        let schema = b0.schema();
        let meta = store
            .write_table(
                "t",
                schema,
                StoredLayout::Bucketed {
                    key: "v".to_string(),
                    bucket_count: 2,
                    sorted_by: Some("v".to_string()),
                },
                vec![vec![b0], vec![batch(vec![3])]],
            )
            .expect("write");
        assert_eq!(meta.stats.rows, 3);
        assert_eq!(
            store.read_layout("t").expect("layout"),
            StoredLayout::Bucketed {
                key: "v".to_string(),
                bucket_count: 2,
                sorted_by: Some("v".to_string()),
            }
        );
        assert_eq!(store.read_part("t", 1).expect("part")[0].num_rows(), 1);
        assert_eq!(store.read_all("t").expect("all").len(), 2);
    }

    #[test]
    fn bucket_count_must_match_parts() {
        let store = MemoryTableStore::new();
        let b0 = batch(vec![1]);
        let err = store
            .write_table(
                "t",
                b0.schema(),
                StoredLayout::Bucketed {
                    key: "v".to_string(),
                    bucket_count: 4,
                    sorted_by: None,
                },
                vec![vec![b0]],
            )
            .expect_err("mismatch");
        assert!(matches!(err, MfqError::LayoutInconsistency(_)));
    }
}
