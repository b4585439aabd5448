//! Column reordering.

use crate::error::EtlResult;
use crate::frame::{Field, Frame, Schema};

/// Move `leading` columns to the front, in the given order. The remaining
/// columns keep their relative order.
pub fn reorder_columns<S: AsRef<str>>(frame: Frame, leading: &[S]) -> EtlResult<Frame> {
    let schema = frame.schema();
    schema.require(leading)?;

    let mut fields: Vec<Field> = Vec::with_capacity(schema.len());
    for name in leading {
        if let Some(field) = schema.get(name.as_ref()) {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
    }
    for field in schema.fields() {
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    }
    let output = Schema::new(fields)?;
    if output == schema {
        return Ok(frame);
    }

    let order: Vec<String> = output.names().into_iter().map(str::to_string).collect();
    frame.map(output, "reorder_columns", move |df| Ok(df.select(&order)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EtlError, FrameError};
    use crate::frame::{Column, DataFrame};

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Column::utf8("name", ["a"]),
            Column::int64("batch_id", [1]),
            Column::int64("id", [7]),
        ])
        .unwrap()
    }

    #[test]
    fn test_leading_columns_first() {
        let out = reorder_columns(frame().into(), &["id", "batch_id"]).unwrap().collect().unwrap();
        assert_eq!(out.column_names(), vec!["id", "batch_id", "name"]);
    }

    #[test]
    fn test_noop_keeps_frame() {
        let out = reorder_columns(frame().into(), &["name"]).unwrap().collect().unwrap();
        assert_eq!(out, frame());
    }

    #[test]
    fn test_unknown_column() {
        let err = reorder_columns(frame().into(), &["nope"]).unwrap_err();
        assert!(matches!(err, EtlError::Frame(FrameError::ColumnNotFound(_))));
    }
}
