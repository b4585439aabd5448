//! JSON-lines row codec for table data files.
//!
//! One JSON object per row, keyed by column name. Values are typed by the
//! schema recorded in the commit entry, so decoding never guesses types.

use serde_json::{Map, Value as JsonValue};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use crate::error::{StorageError, StorageResult};
use crate::frame::{Column, DataFrame, Schema, Value};

/// Write `df` as JSON lines.
pub fn write_rows<W: Write>(writer: W, df: &DataFrame) -> std::io::Result<()> {
    let mut out = BufWriter::new(writer);
    for row in 0..df.height() {
        let mut object = Map::new();
        for column in df.columns() {
            let value = column.get(row).map_or(JsonValue::Null, Value::to_json);
            object.insert(column.name().to_string(), value);
        }
        serde_json::to_writer(&mut out, &JsonValue::Object(object))?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Read JSON lines typed by `schema`. `origin` names the file in errors.
pub fn read_rows<R: Read>(reader: R, schema: &Schema, origin: &str) -> StorageResult<DataFrame> {
    let mut buffers: Vec<Vec<Value>> = vec![Vec::new(); schema.len()];
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.map_err(|e| StorageError::io(origin, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let object: Map<String, JsonValue> = serde_json::from_str(&line)?;
        for (field, buffer) in schema.fields().iter().zip(buffers.iter_mut()) {
            let json = object.get(&field.name).unwrap_or(&JsonValue::Null);
            let value = Value::from_json(json, field.data_type).ok_or_else(|| StorageError::Corrupt {
                uri: origin.to_string(),
                message: format!(
                    "line {}: column '{}' is not {}",
                    index + 1,
                    field.name,
                    field.data_type
                ),
            })?;
            buffer.push(value);
        }
    }

    let columns = schema
        .fields()
        .iter()
        .zip(buffers)
        .map(|(field, values)| Column::new(field.name.clone(), field.data_type, values))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Corrupt {
            uri: origin.to_string(),
            message: e.to_string(),
        })?;
    if columns.is_empty() {
        return Ok(DataFrame::empty(schema));
    }
    DataFrame::new(columns).map_err(|e| StorageError::Corrupt {
        uri: origin.to_string(),
        message: e.to_string(),
    })
}
