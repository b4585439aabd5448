//! Audit column stamping.

use chrono::{DateTime, Utc};

use crate::config::{AuditColumn, AuditDefault};
use crate::error::{EtlResult, SchemaError};
use crate::frame::{now_micros, Column, DataType, Field, Frame, Value};

/// Append the configured audit columns, stamped with the current time.
pub fn add_audit_columns(frame: Frame, audit_columns: &[AuditColumn]) -> EtlResult<Frame> {
    add_audit_columns_at(frame, audit_columns, now_micros())
}

/// Append the configured audit columns in order. Timestamp columns get
/// `clock` on every row; the others are null.
///
/// Fails with [`SchemaError::ReservedColumn`] when the frame already has a
/// column named like an audit column.
pub fn add_audit_columns_at(
    frame: Frame,
    audit_columns: &[AuditColumn],
    clock: DateTime<Utc>,
) -> EtlResult<Frame> {
    let mut schema = frame.schema();
    for audit in audit_columns {
        if schema.contains(&audit.name) {
            return Err(SchemaError::ReservedColumn(audit.name.clone()).into());
        }
        schema = schema.with_field(Field::new(audit.name.clone(), DataType::Timestamp))?;
    }

    let audit_columns = audit_columns.to_vec();
    frame.map(schema, "add_audit_columns", move |mut df| {
        let height = df.height();
        for audit in &audit_columns {
            let value = match audit.default {
                AuditDefault::CurrentTimestamp => Value::Timestamp(clock),
                AuditDefault::Null => Value::Null,
            };
            let column = Column::full(audit.name.clone(), DataType::Timestamp, value, height)?;
            df = df.with_column(column)?;
        }
        Ok(df)
    })
}
