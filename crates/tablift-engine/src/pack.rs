//! Columnar serialization of extracted tables.
//!
//! [`write_table`] turns a [`TabularData`] into Parquet bytes: one typed
//! Arrow array per column, Snappy compression unless the dataset overrides
//! it. Parquet carries per-column null masks, so nulls stay nulls for every
//! physical type; string columns are always written nullable.
//!
//! [`read_table`] inverts the mapping and exists for parity checks: reading
//! written bytes reproduces the table after the documented coercions.

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Decimal128Array, Float64Array, Int32Array,
    Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, ToPrimitive};
use bytes::Bytes;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::sync::Arc;
use tablift_types::{
    ColumnDef, CompressionCodec, LogicalType, OutputSpec, TabularData, Value,
};

/// Decimal columns are written at this fixed precision/scale.
pub const DECIMAL_PRECISION: u8 = 38;
pub const DECIMAL_SCALE: i8 = 10;

/// Columnar serialization failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pack failed: {0}")]
pub struct PackError(pub String);

impl PackError {
    fn wrap(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// Serialize `table` to Parquet bytes per the dataset's output options.
///
/// # Errors
///
/// Fails on an empty schema, a cell/schema type mismatch, or a writer
/// error.
pub fn write_table(table: &TabularData, output: &OutputSpec) -> Result<Vec<u8>, PackError> {
    if table.columns.is_empty() {
        return Err(PackError("table has no columns".into()));
    }

    let schema = Arc::new(Schema::new(
        table
            .columns
            .iter()
            .map(|c| {
                Field::new(
                    &c.name,
                    arrow_type(c.logical_type),
                    // Strings keep nulls regardless of what the driver said.
                    c.nullable || c.logical_type == LogicalType::String,
                )
            })
            .collect::<Vec<_>>(),
    ));

    let arrays: Vec<ArrayRef> = table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| build_array(table, idx, column))
        .collect::<Result<_, _>>()?;
    let batch = RecordBatch::try_new(Arc::clone(&schema), arrays).map_err(PackError::wrap)?;

    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("tablift".to_string()),
    };
    let mut properties = WriterProperties::builder()
        .set_compression(compression(output.compression))
        .set_key_value_metadata(Some(vec![created_by]));
    if let Some(rows) = output.row_group_size {
        properties = properties.set_max_row_group_size(rows.max(1));
    }

    let mut sink = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut sink, schema, Some(properties.build()))
        .map_err(PackError::wrap)?;
    writer.write(&batch).map_err(PackError::wrap)?;
    writer.close().map_err(PackError::wrap)?;
    Ok(sink)
}

fn compression(codec: CompressionCodec) -> Compression {
    match codec {
        CompressionCodec::Snappy => Compression::SNAPPY,
        CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
        CompressionCodec::Gzip => Compression::GZIP(GzipLevel::default()),
        CompressionCodec::Uncompressed => Compression::UNCOMPRESSED,
    }
}

fn arrow_type(logical: LogicalType) -> DataType {
    match logical {
        LogicalType::Int32 => DataType::Int32,
        LogicalType::Int64 => DataType::Int64,
        LogicalType::Decimal => DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE),
        LogicalType::Float64 => DataType::Float64,
        LogicalType::Bool => DataType::Boolean,
        LogicalType::String => DataType::Utf8,
        // Naive UTC, 64-bit microseconds.
        LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        LogicalType::Binary => DataType::Binary,
    }
}

fn type_mismatch(column: &ColumnDef, row: usize, cell: &Value) -> PackError {
    PackError(format!(
        "column '{}' ({}) holds incompatible value {:?} at row {}",
        column.name, column.logical_type, cell, row
    ))
}

fn build_array(
    table: &TabularData,
    idx: usize,
    column: &ColumnDef,
) -> Result<ArrayRef, PackError> {
    let cells = table.rows.iter().map(move |row| &row[idx]);
    let array: ArrayRef = match column.logical_type {
        LogicalType::Int32 => {
            let values = collect_cells(cells, column, |cell| match cell {
                Value::Int32(v) => Some(*v),
                _ => None,
            })?;
            Arc::new(Int32Array::from(values))
        }
        LogicalType::Int64 => {
            let values = collect_cells(cells, column, |cell| match cell {
                Value::Int64(v) => Some(*v),
                Value::Int32(v) => Some(i64::from(*v)),
                _ => None,
            })?;
            Arc::new(Int64Array::from(values))
        }
        LogicalType::Decimal => {
            let values = collect_cells(cells, column, decimal_to_scaled_i128)?;
            let array = Decimal128Array::from(values)
                .with_data_type(DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE));
            Arc::new(array)
        }
        LogicalType::Float64 => {
            let values = collect_cells(cells, column, |cell| match cell {
                Value::Float64(v) => Some(*v),
                Value::Int32(v) => Some(f64::from(*v)),
                _ => None,
            })?;
            Arc::new(Float64Array::from(values))
        }
        LogicalType::Bool => {
            let values = collect_cells(cells, column, |cell| match cell {
                Value::Bool(v) => Some(*v),
                _ => None,
            })?;
            Arc::new(BooleanArray::from(values))
        }
        LogicalType::String => {
            let values = collect_cells(cells, column, |cell| match cell {
                Value::Text(v) => Some(v.clone()),
                _ => None,
            })?;
            Arc::new(StringArray::from(values))
        }
        LogicalType::Timestamp => {
            let values = collect_cells(cells, column, |cell| match cell {
                Value::Timestamp(v) => Some(v.and_utc().timestamp_micros()),
                _ => None,
            })?;
            Arc::new(TimestampMicrosecondArray::from(values))
        }
        LogicalType::Binary => {
            let values = collect_cells(cells, column, |cell| match cell {
                Value::Binary(v) => Some(v.clone()),
                _ => None,
            })?;
            let slices: Vec<Option<&[u8]>> =
                values.iter().map(|v| v.as_deref()).collect();
            Arc::new(BinaryArray::from(slices))
        }
    };
    Ok(array)
}

fn collect_cells<'a, T>(
    cells: impl Iterator<Item = &'a Value>,
    column: &ColumnDef,
    extract: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>, PackError> {
    cells
        .enumerate()
        .map(|(row, cell)| {
            if cell.is_null() {
                Ok(None)
            } else {
                extract(cell)
                    .map(Some)
                    .ok_or_else(|| type_mismatch(column, row, cell))
            }
        })
        .collect()
}

fn decimal_to_scaled_i128(cell: &Value) -> Option<i128> {
    let decimal = match cell {
        Value::Decimal(d) => d.clone(),
        Value::Int64(v) => BigDecimal::from(*v),
        Value::Int32(v) => BigDecimal::from(*v),
        _ => return None,
    };
    let (mantissa, _) = decimal.with_scale(i64::from(DECIMAL_SCALE)).as_bigint_and_exponent();
    mantissa.to_i128()
}

/// Read Parquet bytes written by [`write_table`] back into a table.
///
/// # Errors
///
/// Fails on malformed bytes or a column type outside the supported set.
pub fn read_table(bytes: &[u8]) -> Result<TabularData, PackError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))
        .map_err(PackError::wrap)?;
    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|field| {
            Ok(ColumnDef::new(
                field.name(),
                logical_from_arrow(field.data_type())?,
                field.is_nullable(),
            ))
        })
        .collect::<Result<Vec<_>, PackError>>()?;

    // A zero-row artifact has a schema but may hold no row groups.
    let mut table = TabularData::new(columns);
    for batch in builder.build().map_err(PackError::wrap)? {
        let batch = batch.map_err(PackError::wrap)?;
        append_batch(&mut table, &batch)?;
    }
    Ok(table)
}

fn logical_from_arrow(data_type: &DataType) -> Result<LogicalType, PackError> {
    match data_type {
        DataType::Int32 => Ok(LogicalType::Int32),
        DataType::Int64 => Ok(LogicalType::Int64),
        DataType::Decimal128(_, _) => Ok(LogicalType::Decimal),
        DataType::Float64 => Ok(LogicalType::Float64),
        DataType::Boolean => Ok(LogicalType::Bool),
        DataType::Utf8 => Ok(LogicalType::String),
        DataType::Timestamp(TimeUnit::Microsecond, _) => Ok(LogicalType::Timestamp),
        DataType::Binary => Ok(LogicalType::Binary),
        other => Err(PackError(format!("unsupported column type {other}"))),
    }
}

fn append_batch(table: &mut TabularData, batch: &RecordBatch) -> Result<(), PackError> {
    for row in 0..batch.num_rows() {
        let mut cells = Vec::with_capacity(batch.num_columns());
        for (col, field) in batch.schema().fields().iter().enumerate() {
            let array = batch.column(col);
            if array.is_null(row) {
                cells.push(Value::Null);
                continue;
            }
            cells.push(read_arrow_cell(array, field.data_type(), row)?);
        }
        table.push_row(cells).map_err(PackError::wrap)?;
    }
    Ok(())
}

fn read_arrow_cell(
    array: &ArrayRef,
    data_type: &DataType,
    row: usize,
) -> Result<Value, PackError> {
    fn downcast<'a, T: 'static>(array: &'a ArrayRef, what: &str) -> Result<&'a T, PackError> {
        array
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| PackError(format!("column is not {what}")))
    }

    let value = match data_type {
        DataType::Int32 => Value::Int32(downcast::<Int32Array>(array, "Int32Array")?.value(row)),
        DataType::Int64 => Value::Int64(downcast::<Int64Array>(array, "Int64Array")?.value(row)),
        DataType::Decimal128(_, scale) => {
            let raw = downcast::<Decimal128Array>(array, "Decimal128Array")?.value(row);
            Value::Decimal(BigDecimal::new(BigInt::from(raw), i64::from(*scale)))
        }
        DataType::Float64 => {
            Value::Float64(downcast::<Float64Array>(array, "Float64Array")?.value(row))
        }
        DataType::Boolean => {
            Value::Bool(downcast::<BooleanArray>(array, "BooleanArray")?.value(row))
        }
        DataType::Utf8 => {
            Value::Text(downcast::<StringArray>(array, "StringArray")?.value(row).to_string())
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let micros = downcast::<TimestampMicrosecondArray>(array, "TimestampMicrosecondArray")?
                .value(row);
            let ts = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| PackError(format!("timestamp {micros} out of range")))?;
            Value::Timestamp(ts.naive_utc())
        }
        DataType::Binary => {
            Value::Binary(downcast::<BinaryArray>(array, "BinaryArray")?.value(row).to_vec())
        }
        other => return Err(PackError(format!("unsupported column type {other}"))),
    };
    Ok(value)
}
