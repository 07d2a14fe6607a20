use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use arrow_schema::{Schema, SchemaRef};
use mfq_common::{MfqError, Result, ShardFailure};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rayon::prelude::*;
use tracing::debug;

use crate::commit::{create_staging_dir, discard_staging_dir, replace_dir_atomically};
use crate::memory_store::check_part_count;
use crate::provider::{
    batches_rows, validate_table_name, PartMeta, StoredLayout, TableMeta, TableStore,
};

const TABLE_META_FILE: &str = "_table.json";

/// File name of part `index` inside a table or output directory.
pub fn part_file_name(index: u32) -> String {
    format!("part-{index:05}.parquet")
}

/// Write `batches` to a single parquet file; returns the file size in bytes.
///
/// An empty batch list still produces a readable file carrying `schema`.
pub fn write_parquet_file(path: &Path, schema: &Schema, batches: &[RecordBatch]) -> Result<u64> {
    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, std::sync::Arc::new(schema.clone()), Some(props))
        .map_err(|e| MfqError::Execution(format!("parquet writer init failed: {e}")))?;
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| MfqError::Execution(format!("parquet write failed: {e}")))?;
    }
    writer
        .close()
        .map_err(|e| MfqError::Execution(format!("parquet writer close failed: {e}")))?;
    Ok(fs::metadata(path)?.len())
}

/// Read every batch of one parquet file.
pub fn read_parquet_file(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| MfqError::Execution(format!("parquet reader build failed: {e}")))?
        .build()
        .map_err(|e| MfqError::Execution(format!("parquet reader open failed: {e}")))?;
    reader
        .map(|b| b.map_err(|e| MfqError::Execution(format!("parquet decode failed: {e}"))))
        .collect()
}

/// Durable table store: one directory per table holding `part-NNNNN.parquet`
/// files and a `_table.json` carrying schema, layout, and stats.
#[derive(Debug, Clone)]
pub struct ParquetTableStore {
    root_dir: PathBuf,
}

impl ParquetTableStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        fs::create_dir_all(&root_dir)?;
        Ok(Self { root_dir })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.root_dir.join(table)
    }
}

impl TableStore for ParquetTableStore {
    fn table_meta(&self, table: &str) -> Result<TableMeta> {
        validate_table_name(table)?;
        let path = self.table_dir(table).join(TABLE_META_FILE);
        if !path.exists() {
            return Err(MfqError::UnknownDataset(table.to_string()));
        }
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| MfqError::Execution(format!("table metadata decode failed: {e}")))
    }

    fn read_part(&self, table: &str, part: u32) -> Result<Vec<RecordBatch>> {
        let meta = self.table_meta(table)?;
        if part >= meta.part_count() {
            return Err(MfqError::Execution(format!(
                "part {part} out of range for '{table}' ({} parts)",
                meta.part_count()
            )));
        }
        read_parquet_file(&self.table_dir(table).join(part_file_name(part)))
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
        let target = self.table_dir(table);
        let staged = create_staging_dir(&target)?;

        let results = parts
            .par_iter()
            .enumerate()
            .map(|(idx, batches)| {
                let idx = idx as u32;
                let path = staged.join(part_file_name(idx));
                write_parquet_file(&path, schema.as_ref(), batches).map(|bytes| PartMeta {
                    index: idx,
                    rows: batches_rows(batches),
                    bytes,
                })
            })
            .collect::<Vec<_>>();

        let mut part_meta = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (idx, res) in results.into_iter().enumerate() {
            match res {
                Ok(meta) => part_meta.push(meta),
                Err(e) => failures.push(ShardFailure {
                    shard: idx as u32,
                    reason: e.to_string(),
                }),
            }
        }
        if !failures.is_empty() {
            discard_staging_dir(&staged);
            return Err(match layout {
                StoredLayout::Bucketed { .. } => MfqError::BucketWriteFailure {
                    dataset: table.to_string(),
                    failures,
                },
                StoredLayout::Unpartitioned => MfqError::Execution(format!(
                    "table write failed for '{table}': {}",
                    failures
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                )),
            });
        }

        let meta = TableMeta::new(table, schema.as_ref(), layout, part_meta);
        let payload = serde_json::to_vec_pretty(&meta)
            .map_err(|e| MfqError::Execution(format!("table metadata encode failed: {e}")))?;
        if let Err(e) = fs::write(staged.join(TABLE_META_FILE), payload) {
            discard_staging_dir(&staged);
            return Err(e.into());
        }
        if let Err(e) = replace_dir_atomically(&staged, &target) {
            discard_staging_dir(&staged);
            return Err(e);
        }
        debug!(
            table,
            parts = meta.part_count(),
            rows = meta.stats.rows,
            bytes = meta.stats.bytes,
            "published parquet table"
        );
        Ok(meta)
    }

    fn drop_table(&self, table: &str) -> Result<bool> {
        validate_table_name(table)?;
        let dir = self.table_dir(table);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(dir)?;
        Ok(true)
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut names = fs::read_dir(&self.root_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(TABLE_META_FILE).exists())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}
