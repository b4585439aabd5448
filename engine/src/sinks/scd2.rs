//! SCD type 2 upsert: keep every version of a row with validity intervals.

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info, info_span};

use super::{align_to_target, column_index, ensure_unique_keys, row_lookup, value_columns, SinkOutcome};
use crate::config::{AuditRole, Config};
use crate::error::{EtlError, EtlResult, SchemaError};
use crate::frame::{DataFrame, Frame, KeyValue};
use crate::merge::{build_merge_predicate, build_when_matched_update_predicate};
use crate::storage::{DeltaTable, MergeMetrics, Operation};
use crate::transform::apply_scd_type_2;

/// Merge `frame` into the history table at `table_uri`.
///
/// Source rows identical to the current version of their key (ignoring audit
/// columns) and not older than it are skipped. The rest are stitched into
/// the history with [`apply_scd_type_2`], which closes superseded intervals.
/// A source row with the same key and valid-from as an existing row
/// replaces it.
pub fn upsert_scd_type_2<S: AsRef<str>>(
    table_uri: &str,
    frame: Frame,
    primary_key_columns: &[S],
    config: &Config,
) -> EtlResult<SinkOutcome> {
    let span = info_span!("upsert_scd_type_2", table = %table_uri);
    let _enter = span.enter();

    if primary_key_columns.is_empty() {
        return Err(EtlError::Merge("SCD type 2 upsert needs at least one primary key column".into()));
    }
    let (valid_from, valid_to) = interval_columns(config)?;
    let source = frame.collect()?;
    let missing: Vec<String> = [valid_from, valid_to]
        .into_iter()
        .filter(|name| source.index_of(name).is_none())
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingAuditColumns(missing).into());
    }

    let key_positions = source.positions(primary_key_columns)?;
    if (0..source.height()).any(|r| source.key_at(r, &key_positions).iter().any(KeyValue::is_null)) {
        return Err(EtlError::Merge("SCD type 2 upsert does not accept null primary keys".into()));
    }
    let mut version_key: Vec<&str> = primary_key_columns.iter().map(AsRef::as_ref).collect();
    version_key.push(valid_from);
    ensure_unique_keys(&source, &source.positions(&version_key)?)?;

    if !DeltaTable::exists(table_uri)? {
        let history = apply_scd_type_2(&source, &DataFrame::default(), primary_key_columns, valid_from, valid_to)?;
        let table = DeltaTable::create(table_uri, &history)?;
        info!(rows = history.height(), "Target missing, created it from source");
        return Ok(SinkOutcome {
            table_uri: table_uri.to_string(),
            version: table.version(),
            committed: true,
            operation: Some(Operation::Create),
            metrics: MergeMetrics {
                inserted: history.height(),
                ..MergeMetrics::default()
            },
        });
    }

    let mut table = DeltaTable::open(table_uri)?;
    let target = table.to_data_frame()?;
    let source = align_to_target(&source, &target)?;
    let key_positions = source.positions(primary_key_columns)?;
    let from_pos = target.positions(&[valid_from])?[0];
    let to_pos = target.positions(&[valid_to])?[0];

    let mut excluded: Vec<&str> = primary_key_columns.iter().map(AsRef::as_ref).collect();
    excluded.extend(config.audit_column_names());
    let changed = build_when_matched_update_predicate(&value_columns(&source, &excluded));

    let mut open_rows: HashMap<Vec<KeyValue>, usize> = HashMap::new();
    for row in 0..target.height() {
        if target.columns()[to_pos].values()[row].is_null() {
            open_rows.insert(target.key_at(row, &key_positions), row);
        }
    }

    let index = column_index(&target);
    let mut metrics = MergeMetrics::default();
    let mut keep = Vec::with_capacity(source.height());
    for s in 0..source.height() {
        let unchanged = open_rows.get(&source.key_at(s, &key_positions)).is_some_and(|&t| {
            let current_from = &target.columns()[from_pos].values()[t];
            let incoming_from = &source.columns()[from_pos].values()[s];
            let not_older = matches!(incoming_from.compare(current_from), Some(Ordering::Greater | Ordering::Equal));
            not_older && !changed.evaluate(&row_lookup(&target, &index, t), &row_lookup(&source, &index, s))
        });
        if unchanged {
            metrics.unchanged += 1;
        } else {
            keep.push(s);
        }
    }

    let mut version_positions = key_positions.clone();
    version_positions.push(from_pos);
    let existing: HashMap<Vec<KeyValue>, usize> = (0..target.height())
        .map(|r| (target.key_at(r, &version_positions), r))
        .collect();

    let history = if keep.is_empty() {
        target.clone()
    } else {
        apply_scd_type_2(&source.take(&keep), &target, primary_key_columns, valid_from, valid_to)?
    };
    for row in 0..history.height() {
        match existing.get(&history.key_at(row, &version_positions)) {
            Some(&t) if history.row(row) != target.row(t) => metrics.updated += 1,
            Some(_) => {}
            None => metrics.inserted += 1,
        }
    }

    debug!(
        inserted = metrics.inserted,
        updated = metrics.updated,
        unchanged = metrics.unchanged,
        "Evaluated history merge"
    );
    if metrics.is_noop() {
        info!(version = table.version(), "No changes, nothing committed");
        return Ok(SinkOutcome {
            table_uri: table_uri.to_string(),
            version: table.version(),
            committed: false,
            operation: None,
            metrics,
        });
    }

    let predicate = build_merge_predicate(&version_key);
    let version = table.commit(&history, Operation::MergeScd2, Some(predicate.to_string()), Some(metrics))?;
    Ok(SinkOutcome {
        table_uri: table_uri.to_string(),
        version,
        committed: true,
        operation: Some(Operation::MergeScd2),
        metrics,
    })
}

fn interval_columns(config: &Config) -> EtlResult<(&str, &str)> {
    match (
        config.audit_column_name(AuditRole::ValidFrom),
        config.audit_column_name(AuditRole::ValidTo),
    ) {
        (Some(from), Some(to)) => Ok((from, to)),
        (from, to) => {
            let missing = [(from, AuditRole::ValidFrom), (to, AuditRole::ValidTo)]
                .into_iter()
                .filter(|(name, _)| name.is_none())
                .map(|(_, role)| role.to_string())
                .collect();
            Err(SchemaError::MissingAuditColumns(missing).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_default_config;
    use crate::frame::{Column, Value};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn day(d: u32) -> Value {
        Value::Timestamp(Utc.with_ymd_and_hms(2024, 2, d, 0, 0, 0).unwrap())
    }

    fn versions(ids: &[i64], names: &[&str], from: u32) -> Frame {
        DataFrame::new(vec![
            Column::int64("id", ids.iter().copied()),
            Column::utf8("name", names.iter().copied()),
            Column::timestamp("__valid_from", ids.iter().map(|_| day(from))),
            Column::timestamp("__valid_to", ids.iter().map(|_| Value::Null)),
        ])
        .unwrap()
        .into()
    }

    fn history_of(uri: &str, id: i64) -> Vec<(Value, Value, Value)> {
        let df = DeltaTable::open(uri).unwrap().to_data_frame().unwrap();
        (0..df.height())
            .filter(|&r| df.value(r, "id") == Some(&Value::Int64(id)))
            .map(|r| {
                (
                    df.value(r, "name").cloned().unwrap(),
                    df.value(r, "__valid_from").cloned().unwrap(),
                    df.value(r, "__valid_to").cloned().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_new_version_closes_current_row() {
        let dir = TempDir::new().unwrap();
        let uri = dir.path().join("dim").display().to_string();
        let config = get_default_config();

        let created = upsert_scd_type_2(&uri, versions(&[1, 2], &["a", "b"], 1), &["id"], &config).unwrap();
        assert_eq!(created.operation, Some(Operation::Create));

        let outcome = upsert_scd_type_2(&uri, versions(&[1, 2], &["a2", "b"], 5), &["id"], &config).unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.operation, Some(Operation::MergeScd2));
        assert_eq!(
            outcome.metrics,
            MergeMetrics {
                inserted: 1,
                updated: 1,
                unchanged: 1
            }
        );
        assert_eq!(
            history_of(&uri, 1),
            vec![
                (Value::from("a"), day(1), day(5)),
                (Value::from("a2"), day(5), Value::Null),
            ]
        );
        assert_eq!(history_of(&uri, 2), vec![(Value::from("b"), day(1), Value::Null)]);
    }

    #[test]
    fn test_rerun_is_noop() {
        let dir = TempDir::new().unwrap();
        let uri = dir.path().join("dim").display().to_string();
        let config = get_default_config();
        upsert_scd_type_2(&uri, versions(&[1], &["a"], 1), &["id"], &config).unwrap();

        let outcome = upsert_scd_type_2(&uri, versions(&[1], &["a"], 1), &["id"], &config).unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.version, 0);
    }

    #[test]
    fn test_missing_interval_columns() {
        let dir = TempDir::new().unwrap();
        let uri = dir.path().join("dim").display().to_string();
        let frame = DataFrame::new(vec![Column::int64("id", [1])]).unwrap();
        let err = upsert_scd_type_2(&uri, frame.into(), &["id"], &get_default_config()).unwrap_err();
        assert!(matches!(err, EtlError::Schema(SchemaError::MissingAuditColumns(ref cols)) if cols.len() == 2));
    }

    #[test]
    fn test_null_key_rejected() {
        let dir = TempDir::new().unwrap();
        let uri = dir.path().join("dim").display().to_string();
        let frame = DataFrame::new(vec![
            Column::int64("id", [None::<i64>]),
            Column::timestamp("__valid_from", [day(1)]),
            Column::timestamp("__valid_to", [Value::Null]),
        ])
        .unwrap();
        let err = upsert_scd_type_2(&uri, frame.into(), &["id"], &get_default_config()).unwrap_err();
        assert!(matches!(err, EtlError::Merge(_)));
    }
}
