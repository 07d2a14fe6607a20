//! Delimited-text dataset source.
//!
//! Column types are inferred with `arrow::csv` and then normalized to the four
//! type classes the engine computes over (Int64, Float64, Utf8, Boolean);
//! anything else (dates, timestamps, all-null columns) is read as Utf8.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use mfq_common::{MfqError, Result};

/// Location and parsing options for one delimited input.
#[derive(Debug, Clone)]
pub struct CsvSource {
    pub path: PathBuf,
    pub delimiter: u8,
    /// Declared schema; inferred from the header and a sample when absent.
    pub schema: Option<SchemaRef>,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            schema: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Read a whole delimited file into batches of at most `batch_size` rows.
pub fn read_csv(
    source: &CsvSource,
    infer_records: usize,
    batch_size: usize,
) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let mut file = open(&source.path)?;
    let format = Format::default()
        .with_header(true)
        .with_delimiter(source.delimiter);

    let schema = match &source.schema {
        Some(schema) => schema.clone(),
        None => {
            let (inferred, _) = format
                .infer_schema(&mut file, Some(infer_records.max(1)))
                .map_err(|e| {
                    MfqError::Execution(format!(
                        "csv schema inference failed for {}: {e}",
                        source.path.display()
                    ))
                })?;
            file.seek(SeekFrom::Start(0))?;
            Arc::new(normalize_schema(&inferred))
        }
    };

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_delimiter(source.delimiter)
        .with_batch_size(batch_size.max(1))
        .build(file)
        .map_err(|e| MfqError::Execution(format!("csv reader build failed: {e}")))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            MfqError::Execution(format!(
                "csv decode failed for {}: {e}",
                source.path.display()
            ))
        })?;
    Ok((schema, batches))
}

fn open(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(MfqError::InvalidConfig(format!(
            "input file does not exist: {}",
            path.display()
        )));
    }
    Ok(File::open(path)?)
}

fn normalize_schema(schema: &Schema) -> Schema {
    Schema::new(
        schema
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), normalize_type(f.data_type()), true))
            .collect::<Vec<_>>(),
    )
}

fn normalize_type(dt: &DataType) -> DataType {
    match dt {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => DataType::Int64,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => DataType::Float64,
        DataType::Boolean => DataType::Boolean,
        _ => DataType::Utf8,
    }
}
