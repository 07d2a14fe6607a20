//! Row-oriented value model used by join, bucketing, and aggregation kernels.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, StringArray, StringBuilder,
};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, SchemaRef};
use mfq_common::{MfqError, Result};
use serde::{Deserialize, Serialize};

/// One cell. Integers of every width collapse to `Int64`, floats to `Float64Bits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarValue {
    Int64(i64),
    Float64Bits(u64),
    Utf8(String),
    Boolean(bool),
    Null,
}

impl ScalarValue {
    pub fn float(v: f64) -> Self {
        ScalarValue::Float64Bits(v.to_bits())
    }

    pub fn utf8(v: impl Into<String>) -> Self {
        ScalarValue::Utf8(v.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(x) => Some(*x as f64),
            ScalarValue::Float64Bits(x) => Some(f64::from_bits(*x)),
            _ => None,
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Int64(v) => {
                0_u8.hash(state);
                v.hash(state);
            }
            Self::Float64Bits(v) => {
                1_u8.hash(state);
                v.hash(state);
            }
            Self::Utf8(v) => {
                2_u8.hash(state);
                v.hash(state);
            }
            Self::Boolean(v) => {
                3_u8.hash(state);
                v.hash(state);
            }
            Self::Null => 4_u8.hash(state),
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64Bits(v) => write!(f, "{}", f64::from_bits(*v)),
            ScalarValue::Utf8(v) => write!(f, "{v}"),
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Null => write!(f, "NULL"),
        }
    }
}

/// Total order used for sorting keys: NULL first, numbers numerically.
pub fn cmp_scalar(a: &ScalarValue, b: &ScalarValue) -> Ordering {
    use ScalarValue::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Int64(x), Int64(y)) => x.cmp(y),
        (Float64Bits(x), Float64Bits(y)) => f64::from_bits(*x).total_cmp(&f64::from_bits(*y)),
        (Int64(x), Float64Bits(y)) => (*x as f64).total_cmp(&f64::from_bits(*y)),
        (Float64Bits(x), Int64(y)) => f64::from_bits(*x).total_cmp(&(*y as f64)),
        (Utf8(x), Utf8(y)) => x.cmp(y),
        (Boolean(x), Boolean(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &ScalarValue) -> u8 {
    match v {
        ScalarValue::Null => 0,
        ScalarValue::Boolean(_) => 1,
        ScalarValue::Int64(_) | ScalarValue::Float64Bits(_) => 2,
        ScalarValue::Utf8(_) => 3,
    }
}

/// Lexicographic comparison of composite keys.
pub fn cmp_keys(a: &[ScalarValue], b: &[ScalarValue]) -> Ordering {
    for (av, bv) in a.iter().zip(b.iter()) {
        let ord = cmp_scalar(av, bv);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

pub fn key_has_null(key: &[ScalarValue]) -> bool {
    key.iter().any(ScalarValue::is_null)
}

pub fn key_from_row(row: &[ScalarValue], idxs: &[usize]) -> Vec<ScalarValue> {
    idxs.iter().map(|i| row[*i].clone()).collect()
}

/// Positions of `names` in `schema`.
pub fn resolve_key_indexes(schema: &SchemaRef, names: &[String]) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            schema.index_of(name).map_err(|e| {
                MfqError::Execution(format!("column '{name}' not found in schema: {e}"))
            })
        })
        .collect()
}

pub fn rows_from_batches(batches: &[RecordBatch]) -> Result<Vec<Vec<ScalarValue>>> {
    let mut out = Vec::with_capacity(batches.iter().map(|b| b.num_rows()).sum());
    for batch in batches {
        let columns = batch
            .columns()
            .iter()
            .map(canonical_array)
            .collect::<Result<Vec<_>>>()?;
        for row in 0..batch.num_rows() {
            let mut values = Vec::with_capacity(columns.len());
            for col in &columns {
                values.push(scalar_from_array(col, row)?);
            }
            out.push(values);
        }
    }
    Ok(out)
}

pub fn rows_to_batch(schema: &SchemaRef, rows: &[Vec<ScalarValue>]) -> Result<RecordBatch> {
    let mut cols = vec![Vec::<ScalarValue>::with_capacity(rows.len()); schema.fields().len()];
    for row in rows {
        if row.len() != cols.len() {
            return Err(MfqError::Execution(format!(
                "row width {} does not match schema width {}",
                row.len(),
                cols.len()
            )));
        }
        for (idx, value) in row.iter().enumerate() {
            cols[idx].push(value.clone());
        }
    }
    let arrays = cols
        .iter()
        .enumerate()
        .map(|(idx, col)| scalars_to_array(col, schema.field(idx).data_type()))
        .collect::<Result<Vec<_>>>()?;
    RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| MfqError::Execution(format!("output batch build failed: {e}")))
}

/// Casts that take a stored column type to the row model's type, in order.
///
/// Dates and timestamps travel as their integer representation and are cast
/// back on output, so they group, join, and hash like integers of one type.
fn canonical_path(dt: &DataType) -> &'static [DataType] {
    match dt {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Date64
        | DataType::Timestamp(_, _) => &[DataType::Int64],
        DataType::Date32 => &[DataType::Int32, DataType::Int64],
        DataType::Float16 | DataType::Float32 => &[DataType::Float64],
        DataType::LargeUtf8 => &[DataType::Utf8],
        _ => &[],
    }
}

fn cast_checked(array: &ArrayRef, to: &DataType) -> Result<ArrayRef> {
    let options = CastOptions {
        safe: false,
        ..CastOptions::default()
    };
    cast_with_options(array.as_ref(), to, &options).map_err(|e| {
        MfqError::Execution(format!(
            "column cast {:?} -> {to:?} failed: {e}",
            array.data_type()
        ))
    })
}

fn canonical_array(array: &ArrayRef) -> Result<ArrayRef> {
    let mut out = Arc::clone(array);
    for step in canonical_path(array.data_type()) {
        out = cast_checked(&out, step)?;
    }
    Ok(out)
}

/// Whether a literal of `value`'s kind can compare equal to cells of `dt`.
pub fn scalar_matches_type(value: &ScalarValue, dt: &DataType) -> bool {
    let row_type = canonical_path(dt).last().unwrap_or(dt);
    match value {
        ScalarValue::Null => true,
        ScalarValue::Int64(_) | ScalarValue::Float64Bits(_) => {
            matches!(row_type, DataType::Int64 | DataType::Float64)
        }
        ScalarValue::Utf8(_) => matches!(row_type, DataType::Utf8),
        ScalarValue::Boolean(_) => matches!(row_type, DataType::Boolean),
    }
}

fn scalar_from_array(array: &ArrayRef, row: usize) -> Result<ScalarValue> {
    if array.is_null(row) {
        return Ok(ScalarValue::Null);
    }
    match array.data_type() {
        DataType::Int64 => {
            let a = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| MfqError::Execution("expected Int64Array".to_string()))?;
            Ok(ScalarValue::Int64(a.value(row)))
        }
        DataType::Float64 => {
            let a = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| MfqError::Execution("expected Float64Array".to_string()))?;
            Ok(ScalarValue::Float64Bits(a.value(row).to_bits()))
        }
        DataType::Utf8 => {
            let a = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| MfqError::Execution("expected StringArray".to_string()))?;
            Ok(ScalarValue::Utf8(a.value(row).to_string()))
        }
        DataType::Boolean => {
            let a = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| MfqError::Execution("expected BooleanArray".to_string()))?;
            Ok(ScalarValue::Boolean(a.value(row)))
        }
        DataType::Null => Ok(ScalarValue::Null),
        other => Err(MfqError::Unsupported(format!(
            "column type not supported: {other:?}"
        ))),
    }
}

fn scalars_to_array(values: &[ScalarValue], dt: &DataType) -> Result<ArrayRef> {
    let path = canonical_path(dt);
    if let Some((row_type, back)) = path.split_last() {
        let mut out = scalars_to_array(values, row_type)?;
        for step in back.iter().rev() {
            out = cast_checked(&out, step)?;
        }
        return cast_checked(&out, dt);
    }
    match dt {
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Int64(x) => b.append_value(*x),
                    ScalarValue::Null => b.append_null(),
                    _ => {
                        return Err(MfqError::Execution(
                            "type mismatch while building Int64 array".to_string(),
                        ));
                    }
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Float64Bits(x) => b.append_value(f64::from_bits(*x)),
                    ScalarValue::Int64(x) => b.append_value(*x as f64),
                    ScalarValue::Null => b.append_null(),
                    _ => {
                        return Err(MfqError::Execution(
                            "type mismatch while building Float64 array".to_string(),
                        ));
                    }
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::with_capacity(values.len(), values.len() * 8);
            for v in values {
                match v {
                    ScalarValue::Utf8(x) => b.append_value(x),
                    ScalarValue::Null => b.append_null(),
                    _ => {
                        return Err(MfqError::Execution(
                            "type mismatch while building Utf8 array".to_string(),
                        ));
                    }
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Boolean(x) => b.append_value(*x),
                    ScalarValue::Null => b.append_null(),
                    _ => {
                        return Err(MfqError::Execution(
                            "type mismatch while building Boolean array".to_string(),
                        ));
                    }
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Null => Ok(arrow::array::new_null_array(&DataType::Null, values.len())),
        other => Err(MfqError::Unsupported(format!(
            "output type not supported: {other:?}"
        ))),
    }
}
