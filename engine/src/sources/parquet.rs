//! Parquet file sources.
//!
//! The schema is taken from the file footers when the source is opened; the
//! row data is only decoded when the frame is collected. Only flat schemas
//! are supported.

use parquet::basic::{ConvertedType, LogicalType, Type as PhysicalType};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field as ParquetField;
use parquet::schema::types::ColumnDescriptor;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{EtlResult, StorageError, StorageResult};
use crate::frame::{DataFrame, DataType, Field, Frame, LazyFrame, Schema, Value};

use super::files::resolve_glob;

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

fn parquet_error(path: &Path, err: impl ToString) -> StorageError {
    StorageError::Parquet {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn open(path: &Path) -> StorageResult<SerializedFileReader<File>> {
    let file = File::open(path).map_err(|e| StorageError::io(path.display().to_string(), e))?;
    SerializedFileReader::new(file).map_err(|e| parquet_error(path, e))
}

fn column_type(column: &ColumnDescriptor) -> DataType {
    let logical = column.logical_type();
    let converted = column.converted_type();
    match column.physical_type() {
        PhysicalType::BOOLEAN => DataType::Boolean,
        PhysicalType::INT32 | PhysicalType::INT64 => {
            let temporal = matches!(logical, Some(LogicalType::Timestamp { .. }) | Some(LogicalType::Date))
                || matches!(
                    converted,
                    ConvertedType::TIMESTAMP_MILLIS | ConvertedType::TIMESTAMP_MICROS | ConvertedType::DATE
                );
            if temporal {
                DataType::Timestamp
            } else {
                DataType::Int64
            }
        }
        PhysicalType::INT96 => DataType::Timestamp,
        PhysicalType::FLOAT | PhysicalType::DOUBLE => DataType::Float64,
        // byte arrays: strings, decimals and raw binary are read as text
        _ => DataType::Utf8,
    }
}

/// Frame schema of one parquet file, read from its footer.
pub fn read_schema(path: &Path) -> StorageResult<Schema> {
    let reader = open(path)?;
    let descr = reader.metadata().file_metadata().schema_descr();
    let mut fields = Vec::with_capacity(descr.num_columns());
    for column in descr.columns() {
        if column.path().parts().len() > 1 {
            return Err(parquet_error(
                path,
                format!("nested column '{}' is not supported", column.path()),
            ));
        }
        fields.push(Field::new(column.name(), column_type(column)));
    }
    Schema::new(fields).map_err(|e| parquet_error(path, e))
}

fn convert(field: &ParquetField, data_type: DataType) -> Option<Value> {
    let value = match field {
        ParquetField::Null => Value::Null,
        ParquetField::Bool(b) => Value::Boolean(*b),
        ParquetField::Byte(v) => Value::Int64((*v).into()),
        ParquetField::Short(v) => Value::Int64((*v).into()),
        ParquetField::Int(v) => Value::Int64((*v).into()),
        ParquetField::Long(v) => Value::Int64(*v),
        ParquetField::UByte(v) => Value::Int64((*v).into()),
        ParquetField::UShort(v) => Value::Int64((*v).into()),
        ParquetField::UInt(v) => Value::Int64((*v).into()),
        ParquetField::ULong(v) => Value::Int64(i64::try_from(*v).ok()?),
        ParquetField::Float(v) => Value::Float64((*v).into()),
        ParquetField::Double(v) => Value::Float64(*v),
        ParquetField::Str(s) => Value::Utf8(s.clone()),
        ParquetField::Bytes(b) => Value::Utf8(String::from_utf8_lossy(b.data()).into_owned()),
        ParquetField::Date(days) => Value::timestamp_micros(i64::from(*days) * MICROS_PER_DAY),
        ParquetField::TimestampMillis(ms) => Value::timestamp_micros(ms.checked_mul(1_000)?),
        ParquetField::TimestampMicros(us) => Value::timestamp_micros(*us),
        other => Value::Utf8(other.to_string()),
    };
    match (value, data_type) {
        (v, dt) if v.fits(dt) => Some(v),
        (Value::Int64(i), DataType::Float64) => Some(Value::Float64(i as f64)),
        (v, DataType::Utf8) => Some(Value::Utf8(v.to_string())),
        _ => None,
    }
}

/// Decode every row of one file into `schema`.
pub fn read_file(path: &Path, schema: &Schema) -> StorageResult<DataFrame> {
    let mut rows = Vec::new();
    read_rows_into(path, schema, &mut rows)?;
    DataFrame::from_rows(schema, rows).map_err(|e| parquet_error(path, e))
}

fn read_rows_into(path: &Path, schema: &Schema, out: &mut Vec<Vec<Value>>) -> StorageResult<()> {
    let reader = open(path)?;
    // file column position of each frame field, resolved once per file
    let positions: Vec<Option<usize>> = {
        let descr = reader.metadata().file_metadata().schema_descr();
        let file_columns: HashMap<&str, usize> = descr
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name(), i))
            .collect();
        schema
            .fields()
            .iter()
            .map(|f| file_columns.get(f.name.as_str()).copied())
            .collect()
    };

    let rows = reader.get_row_iter(None).map_err(|e| parquet_error(path, e))?;
    for row in rows {
        let row = row.map_err(|e| parquet_error(path, e))?;
        let cells: Vec<&ParquetField> = row.get_column_iter().map(|(_, cell)| cell).collect();
        let mut values = Vec::with_capacity(schema.len());
        for (field, position) in schema.fields().iter().zip(&positions) {
            let value = match position.and_then(|p| cells.get(p)) {
                None => Value::Null,
                Some(cell) => convert(cell, field.data_type).ok_or_else(|| {
                    parquet_error(
                        path,
                        format!("value {} does not fit column '{}' ({})", cell, field.name, field.data_type),
                    )
                })?,
            };
            values.push(value);
        }
        out.push(values);
    }
    Ok(())
}

fn read_all(files: &[PathBuf], schema: &Schema) -> StorageResult<DataFrame> {
    let mut rows = Vec::new();
    for path in files {
        read_rows_into(path, schema, &mut rows)?;
    }
    DataFrame::from_rows(schema, rows).map_err(|e| StorageError::Parquet {
        path: files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "),
        message: e.to_string(),
    })
}

/// Lazily read every parquet file matching `glob_uri`. All files must
/// share one schema.
pub fn source_parquet(glob_uri: &str) -> EtlResult<Frame> {
    let files = resolve_glob(glob_uri)?;
    let schema = read_schema(&files[0])?;
    for path in &files[1..] {
        if read_schema(path)? != schema {
            return Err(parquet_error(path, "schema differs from the first matched file").into());
        }
    }
    debug!(source = %glob_uri, files = files.len(), "Opened parquet source");

    let declared = schema.clone();
    let lazy = LazyFrame::new(declared, format!("parquet_scan({})", glob_uri), move || {
        Ok(read_all(&files, &schema)?)
    });
    Ok(Frame::Lazy(lazy))
}
