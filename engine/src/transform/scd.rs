//! Slowly changing dimension, type 2.
//!
//! History for one business key is a chain of validity intervals:
//!
//! ```text
//! valid_from   valid_to
//! 2024-01-01   2024-03-01
//! 2024-03-01   2024-06-01
//! 2024-06-01   null          <- current row
//! ```
//!
//! [`apply_scd_type_2`] merges incoming rows into existing history and
//! recomputes every `valid_to` so the chain stays gap-free, including when
//! an incoming row lands between two existing ones.

use std::collections::HashMap;

use crate::error::{EtlResult, FrameError, SchemaError};
use crate::frame::{DataFrame, KeyValue, Value};

#[derive(Clone, Copy)]
enum Origin {
    Target(usize),
    Source(usize),
}

/// Merge `source` rows into the `target` history and re-close intervals.
///
/// Rows are grouped by `primary_key_columns`. A source row with the same
/// key and `valid_from_column` as an existing row replaces it. Within each
/// group rows are ordered by `valid_from_column`; each row's
/// `valid_to_column` is set to the next row's `valid_from_column`, and the
/// last row is left open (null).
///
/// The output has the source's column order. Groups appear in order of
/// first appearance, target rows before source rows.
pub fn apply_scd_type_2<S: AsRef<str>>(
    source: &DataFrame,
    target: &DataFrame,
    primary_key_columns: &[S],
    valid_from_column: &str,
    valid_to_column: &str,
) -> EtlResult<DataFrame> {
    let schema = source.schema();
    schema.require(primary_key_columns)?;
    schema.require(&[valid_from_column, valid_to_column])?;
    if primary_key_columns.is_empty() {
        return Err(FrameError::InvalidArgument("SCD type 2 needs at least one primary key column".into()).into());
    }

    let target = if target.width() == 0 {
        DataFrame::empty(&schema)
    } else if target.schema().same_fields(&schema) {
        target.select(&schema.names())?
    } else {
        return Err(SchemaError::Incompatible(format!(
            "source columns [{}] do not match target columns [{}]",
            schema.names().join(", "),
            target.column_names().join(", ")
        ))
        .into());
    };

    let key_positions = source.positions(primary_key_columns)?;
    let from_pos = schema.index_of(valid_from_column).unwrap_or_default();
    let to_pos = schema.index_of(valid_to_column).unwrap_or_default();

    // (key, valid_from) -> row; later entries supersede earlier ones
    let mut slots: HashMap<(Vec<KeyValue>, KeyValue), Origin> = HashMap::new();
    let mut group_order: Vec<Vec<KeyValue>> = Vec::new();
    let mut groups: HashMap<Vec<KeyValue>, Vec<(Value, Origin)>> = HashMap::new();

    let frames = [(&target, true), (source, false)];
    for (df, is_target) in frames {
        for row in 0..df.height() {
            let valid_from = df.columns()[from_pos].values()[row].clone();
            if valid_from.is_null() {
                return Err(FrameError::NullValue(valid_from_column.to_string()).into());
            }
            let key = df.key_at(row, &key_positions);
            let origin = if is_target { Origin::Target(row) } else { Origin::Source(row) };
            let slot = (key.clone(), valid_from.key());
            let replaced = slots.insert(slot, origin).is_some();

            let group = groups.entry(key.clone()).or_insert_with(|| {
                group_order.push(key);
                Vec::new()
            });
            if replaced {
                if let Some(existing) = group.iter_mut().find(|(vf, _)| vf.key() == valid_from.key()) {
                    existing.1 = origin;
                    continue;
                }
            }
            group.push((valid_from, origin));
        }
    }

    let mut rows = Vec::with_capacity(target.height() + source.height());
    for key in &group_order {
        let Some(group) = groups.get_mut(key) else {
            continue;
        };
        group.sort_by(|a, b| a.0.sort_cmp(&b.0));
        for (i, (_, origin)) in group.iter().enumerate() {
            let mut row = match *origin {
                Origin::Target(r) => target.row(r),
                Origin::Source(r) => source.row(r),
            };
            row[to_pos] = group.get(i + 1).map_or(Value::Null, |(next, _)| next.clone());
            rows.push(row);
        }
    }

    Ok(DataFrame::from_rows(&schema, rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Column;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn day(d: u32) -> Value {
        Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap())
    }

    fn history(ids: &[i64], names: &[&str], from: &[u32], to: &[Option<u32>]) -> DataFrame {
        DataFrame::new(vec![
            Column::int64("id", ids.iter().copied()),
            Column::utf8("name", names.iter().copied()),
            Column::timestamp("valid_from", from.iter().map(|&d| day(d))),
            Column::timestamp("valid_to", to.iter().map(|d| d.map_or(Value::Null, day))),
        ])
        .unwrap()
    }

    fn rows_for(df: &DataFrame, id: i64) -> Vec<(Value, Value, Value)> {
        (0..df.height())
            .filter(|&r| df.value(r, "id") == Some(&Value::Int64(id)))
            .map(|r| {
                (
                    df.value(r, "name").cloned().unwrap(),
                    df.value(r, "valid_from").cloned().unwrap(),
                    df.value(r, "valid_to").cloned().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_target_opens_every_key() {
        let source = history(&[1, 2], &["a", "b"], &[1, 1], &[None, None]);
        let out = apply_scd_type_2(&source, &DataFrame::default(), &["id"], "valid_from", "valid_to").unwrap();
        assert_eq!(out, source);
    }

    #[test]
    fn test_new_version_closes_previous() {
        let target = history(&[1, 2], &["a", "b"], &[1, 1], &[None, None]);
        let source = history(&[1, 3], &["a2", "c"], &[5, 5], &[None, None]);
        let out = apply_scd_type_2(&source, &target, &["id"], "valid_from", "valid_to").unwrap();

        assert_eq!(out.height(), 4);
        assert_eq!(
            rows_for(&out, 1),
            vec![
                (Value::from("a"), day(1), day(5)),
                (Value::from("a2"), day(5), Value::Null),
            ]
        );
        assert_eq!(rows_for(&out, 2), vec![(Value::from("b"), day(1), Value::Null)]);
        assert_eq!(rows_for(&out, 3), vec![(Value::from("c"), day(5), Value::Null)]);
    }

    #[test]
    fn test_retroactive_insert() {
        let target = history(&[1, 1], &["a", "c"], &[1, 9], &[Some(9), None]);
        let source = history(&[1], &["b"], &[4], &[None]);
        let out = apply_scd_type_2(&source, &target, &["id"], "valid_from", "valid_to").unwrap();
        assert_eq!(
            rows_for(&out, 1),
            vec![
                (Value::from("a"), day(1), day(4)),
                (Value::from("b"), day(4), day(9)),
                (Value::from("c"), day(9), Value::Null),
            ]
        );
    }

    #[test]
    fn test_same_valid_from_replaces_row() {
        let target = history(&[1], &["a"], &[1], &[None]);
        let source = history(&[1], &["a-fixed"], &[1], &[None]);
        let out = apply_scd_type_2(&source, &target, &["id"], "valid_from", "valid_to").unwrap();
        assert_eq!(rows_for(&out, 1), vec![(Value::from("a-fixed"), day(1), Value::Null)]);
    }

    #[test]
    fn test_composite_key() {
        let source = DataFrame::new(vec![
            Column::int64("id", [1, 1, 1]),
            Column::utf8("region", ["eu", "us", "eu"]),
            Column::timestamp("valid_from", [day(1), day(1), day(3)]),
            Column::timestamp("valid_to", [Value::Null, Value::Null, Value::Null]),
        ])
        .unwrap();
        let out = apply_scd_type_2(&source, &DataFrame::default(), &["id", "region"], "valid_from", "valid_to").unwrap();
        let open = out.column("valid_to").unwrap().null_count();
        assert_eq!(open, 2);
    }

    #[test]
    fn test_null_valid_from_rejected() {
        let source = DataFrame::new(vec![
            Column::int64("id", [1]),
            Column::timestamp("valid_from", [Value::Null]),
            Column::timestamp("valid_to", [Value::Null]),
        ])
        .unwrap();
        let err = apply_scd_type_2(&source, &DataFrame::default(), &["id"], "valid_from", "valid_to").unwrap_err();
        assert!(matches!(err, crate::error::EtlError::Frame(FrameError::NullValue(_))));
    }

    proptest! {
        #[test]
        fn prop_intervals_form_unbroken_chain(
            existing in proptest::collection::vec((0i64..4, 1u32..28), 0..20),
            incoming in proptest::collection::vec((0i64..4, 1u32..28), 0..20),
        ) {
            // existing history is itself well formed
            let seed = |rows: &[(i64, u32)]| DataFrame::new(vec![
                Column::int64("id", rows.iter().map(|r| r.0)),
                Column::utf8("name", rows.iter().map(|r| format!("v{}", r.1))),
                Column::timestamp("valid_from", rows.iter().map(|r| day(r.1))),
                Column::timestamp("valid_to", rows.iter().map(|_| Value::Null)),
            ]).unwrap();
            let target = apply_scd_type_2(&seed(&existing), &DataFrame::default(), &["id"], "valid_from", "valid_to").unwrap();
            let out = apply_scd_type_2(&seed(&incoming), &target, &["id"], "valid_from", "valid_to").unwrap();

            let mut by_key: HashMap<i64, Vec<(Value, Value)>> = HashMap::new();
            for r in 0..out.height() {
                let Some(Value::Int64(id)) = out.value(r, "id") else { unreachable!() };
                by_key.entry(*id).or_default().push((
                    out.value(r, "valid_from").cloned().unwrap(),
                    out.value(r, "valid_to").cloned().unwrap(),
                ));
            }
            for rows in by_key.values() {
                prop_assert_eq!(rows.iter().filter(|(_, to)| to.is_null()).count(), 1);
                for (_, to) in rows.iter().filter(|(_, to)| !to.is_null()) {
                    prop_assert_eq!(rows.iter().filter(|(from, _)| from == to).count(), 1);
                }
            }
        }
    }
}
