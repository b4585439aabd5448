//! SCD type 1 upsert: one current row per primary key, changes overwrite.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, info_span};

use super::{align_to_target, column_index, ensure_unique_keys, row_lookup, value_columns, SinkOutcome};
use crate::config::{AuditRole, Config};
use crate::error::{EtlError, EtlResult};
use crate::frame::{now_micros, DataFrame, DataType, Frame, KeyValue, Schema, Value};
use crate::merge::{build_merge_predicate, build_when_matched_update_columns, build_when_matched_update_predicate};
use crate::storage::{DeltaTable, MergeMetrics, Operation};

/// Merge `frame` into the table at `table_uri`, stamped with the current time.
///
/// See [`upsert_scd_type_1_at`].
pub fn upsert_scd_type_1<S: AsRef<str>>(
    table_uri: &str,
    frame: Frame,
    primary_key_columns: &[S],
    config: &Config,
    except_columns: &[S],
) -> EtlResult<SinkOutcome> {
    upsert_scd_type_1_at(table_uri, frame, primary_key_columns, config, except_columns, now_micros())
}

/// Merge `frame` into the table at `table_uri` using `clock` as the merge
/// timestamp.
///
/// - matched and changed: every column other than the primary key,
///   `except_columns` and the configured audit columns is overwritten, and
///   the modified-at column is set to `clock`
/// - matched and unchanged: left alone
/// - not matched (including any null key): inserted with created-at and
///   modified-at set to `clock`
///
/// A missing table is created from the stamped frame. Nothing is committed
/// when no row is inserted or updated.
pub fn upsert_scd_type_1_at<S: AsRef<str>>(
    table_uri: &str,
    frame: Frame,
    primary_key_columns: &[S],
    config: &Config,
    except_columns: &[S],
    clock: DateTime<Utc>,
) -> EtlResult<SinkOutcome> {
    let span = info_span!("upsert_scd_type_1", table = %table_uri);
    let _enter = span.enter();

    if primary_key_columns.is_empty() {
        return Err(EtlError::Merge("SCD type 1 upsert needs at least one primary key column".into()));
    }
    let source = frame.collect()?;
    let key_positions = source.positions(primary_key_columns)?;
    ensure_unique_keys(&source, &key_positions)?;

    let stamps: Vec<&str> = [AuditRole::CreatedAt, AuditRole::ModifiedAt]
        .into_iter()
        .filter_map(|role| config.audit_column_name(role))
        .collect();

    if !DeltaTable::exists(table_uri)? {
        let schema = source.schema();
        let rows = (0..source.height())
            .map(|r| {
                let mut row = source.row(r);
                stamp(&mut row, &schema, &stamps, clock);
                row
            })
            .collect();
        let df = DataFrame::from_rows(&schema, rows)?;
        let table = DeltaTable::create(table_uri, &df)?;
        info!(rows = df.height(), "Target missing, created it from source");
        return Ok(SinkOutcome {
            table_uri: table_uri.to_string(),
            version: table.version(),
            committed: true,
            operation: Some(Operation::Create),
            metrics: MergeMetrics {
                inserted: df.height(),
                ..MergeMetrics::default()
            },
        });
    }

    let mut table = DeltaTable::open(table_uri)?;
    let target = table.to_data_frame()?;
    let source = align_to_target(&source, &target)?;
    let schema = target.schema();
    let key_positions = source.positions(primary_key_columns)?;

    let mut excluded: Vec<&str> = primary_key_columns.iter().map(AsRef::as_ref).collect();
    excluded.extend(except_columns.iter().map(AsRef::as_ref));
    excluded.extend(config.audit_column_names());
    let compared = value_columns(&source, &excluded);

    let merge_predicate = build_merge_predicate(primary_key_columns);
    let update_predicate = build_when_matched_update_predicate(&compared);
    let assignments: Vec<usize> = build_when_matched_update_columns(&compared)
        .iter()
        .filter_map(|(target_ref, _)| schema.index_of(&target_ref.column))
        .collect();
    let modified_at = config
        .audit_column_name(AuditRole::ModifiedAt)
        .and_then(|name| schema.index_of(name))
        .filter(|&i| schema.fields()[i].data_type == DataType::Timestamp);

    let mut by_key: HashMap<Vec<KeyValue>, Vec<usize>> = HashMap::new();
    for row in 0..target.height() {
        let key = target.key_at(row, &key_positions);
        if !key.iter().any(KeyValue::is_null) {
            by_key.entry(key).or_default().push(row);
        }
    }

    let index = column_index(&target);
    let mut rows: Vec<Vec<Value>> = (0..target.height()).map(|r| target.row(r)).collect();
    let mut metrics = MergeMetrics::default();

    for s in 0..source.height() {
        let source_row = row_lookup(&source, &index, s);
        let matched: Vec<usize> = by_key
            .get(&source.key_at(s, &key_positions))
            .map(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .filter(|&t| merge_predicate.evaluate(&row_lookup(&target, &index, t), &source_row))
                    .collect()
            })
            .unwrap_or_default();

        if matched.is_empty() {
            let mut row = source.row(s);
            stamp(&mut row, &schema, &stamps, clock);
            rows.push(row);
            metrics.inserted += 1;
            continue;
        }
        for t in matched {
            if !update_predicate.evaluate(&row_lookup(&target, &index, t), &source_row) {
                metrics.unchanged += 1;
                continue;
            }
            for &i in &assignments {
                rows[t][i] = source.columns()[i].values()[s].clone();
            }
            if let Some(i) = modified_at {
                rows[t][i] = Value::Timestamp(clock);
            }
            metrics.updated += 1;
        }
    }

    debug!(
        inserted = metrics.inserted,
        updated = metrics.updated,
        unchanged = metrics.unchanged,
        "Evaluated merge"
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

    let merged = DataFrame::from_rows(&schema, rows)?;
    let version = table.commit(
        &merged,
        Operation::Merge,
        Some(merge_predicate.to_string()),
        Some(metrics),
    )?;
    Ok(SinkOutcome {
        table_uri: table_uri.to_string(),
        version,
        committed: true,
        operation: Some(Operation::Merge),
        metrics,
    })
}

/// Set the named timestamp columns of `row` to `clock`.
fn stamp(row: &mut [Value], schema: &Schema, columns: &[&str], clock: DateTime<Utc>) {
    for name in columns {
        if let Some(i) = schema.index_of(name) {
            if schema.fields()[i].data_type == DataType::Timestamp {
                row[i] = Value::Timestamp(clock);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_default_config;
    use crate::error::SchemaError;
    use crate::frame::Column;
    use crate::transform::add_audit_columns_at;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn audited(ids: &[Option<i64>], names: &[&str], batch: i64) -> Frame {
        let config = get_default_config();
        let df = DataFrame::new(vec![
            Column::int64("id", ids.iter().copied()),
            Column::utf8("name", names.iter().copied()),
            Column::int64("batch_id", ids.iter().map(|_| batch)),
        ])
        .unwrap();
        add_audit_columns_at(df.into(), &config.audit_columns, at(0)).unwrap()
    }

    fn table_uri(dir: &TempDir) -> String {
        dir.path().join("customers").display().to_string()
    }

    fn current(uri: &str) -> DataFrame {
        DeltaTable::open(uri).unwrap().to_data_frame().unwrap()
    }

    fn row_for(df: &DataFrame, id: i64) -> usize {
        (0..df.height())
            .find(|&r| df.value(r, "id") == Some(&Value::Int64(id)))
            .unwrap()
    }

    const NONE: &[&str] = &[];

    #[test]
    fn test_creates_missing_table() {
        let dir = TempDir::new().unwrap();
        let uri = table_uri(&dir);
        let config = get_default_config();

        let outcome =
            upsert_scd_type_1_at(&uri, audited(&[Some(1), Some(2)], &["a", "b"], 1), &["id"], &config, NONE, at(1))
                .unwrap();
        assert_eq!(outcome.version, 0);
        assert_eq!(outcome.operation, Some(Operation::Create));
        assert_eq!(outcome.metrics.inserted, 2);

        let df = current(&uri);
        assert_eq!(df.height(), 2);
        for r in 0..2 {
            assert_eq!(df.value(r, "__created_at"), Some(&Value::Timestamp(at(1))));
            assert_eq!(df.value(r, "__modified_at"), Some(&Value::Timestamp(at(1))));
        }
    }

    #[test]
    fn test_updates_changed_rows_and_inserts_new() {
        let dir = TempDir::new().unwrap();
        let uri = table_uri(&dir);
        let config = get_default_config();
        upsert_scd_type_1_at(&uri, audited(&[Some(1), Some(2)], &["a", "b"], 1), &["id"], &config, NONE, at(1))
            .unwrap();

        let outcome = upsert_scd_type_1_at(
            &uri,
            audited(&[Some(1), Some(2), Some(3)], &["a", "b2", "c"], 2),
            &["id"],
            &config,
            &["batch_id"],
            at(2),
        )
        .unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(
            outcome.metrics,
            MergeMetrics {
                inserted: 1,
                updated: 1,
                unchanged: 1
            }
        );

        let df = current(&uri);
        assert_eq!(df.height(), 3);

        let unchanged = row_for(&df, 1);
        assert_eq!(df.value(unchanged, "__modified_at"), Some(&Value::Timestamp(at(1))));
        // batch_id is excluded from the comparison, so it was not rewritten
        assert_eq!(df.value(unchanged, "batch_id"), Some(&Value::Int64(1)));

        let updated = row_for(&df, 2);
        assert_eq!(df.value(updated, "name"), Some(&Value::from("b2")));
        assert_eq!(df.value(updated, "__created_at"), Some(&Value::Timestamp(at(1))));
        assert_eq!(df.value(updated, "__modified_at"), Some(&Value::Timestamp(at(2))));

        let inserted = row_for(&df, 3);
        assert_eq!(df.value(inserted, "__created_at"), Some(&Value::Timestamp(at(2))));

        let history = DeltaTable::open(&uri).unwrap().history().unwrap();
        assert_eq!(history[0].operation, Operation::Merge);
        assert_eq!(history[0].predicate.as_deref(), Some(r#"(target."id" = source."id")"#));
    }

    #[test]
    fn test_rerun_is_noop() {
        let dir = TempDir::new().unwrap();
        let uri = table_uri(&dir);
        let config = get_default_config();
        let frame = || audited(&[Some(1), Some(2)], &["a", "b"], 1);
        upsert_scd_type_1_at(&uri, frame(), &["id"], &config, NONE, at(1)).unwrap();
        let before = current(&uri);

        let outcome = upsert_scd_type_1_at(&uri, frame(), &["id"], &config, NONE, at(5)).unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.version, 0);
        assert_eq!(outcome.metrics.unchanged, 2);
        assert_eq!(current(&uri), before);
    }

    #[test]
    fn test_null_key_never_matches() {
        let dir = TempDir::new().unwrap();
        let uri = table_uri(&dir);
        let config = get_default_config();
        upsert_scd_type_1_at(&uri, audited(&[None], &["ghost"], 1), &["id"], &config, NONE, at(1)).unwrap();

        let outcome = upsert_scd_type_1_at(&uri, audited(&[None], &["ghost"], 1), &["id"], &config, NONE, at(2))
            .unwrap();
        assert_eq!(outcome.metrics.inserted, 1);
        assert_eq!(current(&uri).height(), 2);
    }

    #[test]
    fn test_null_transition_counts_as_change() {
        let dir = TempDir::new().unwrap();
        let uri = table_uri(&dir);
        let config = get_default_config();
        let with_name = |name: Option<&str>| {
            let df = DataFrame::new(vec![
                Column::int64("id", [1]),
                Column::utf8("name", [name]),
                Column::int64("batch_id", [1]),
            ])
            .unwrap();
            add_audit_columns_at(df.into(), &config.audit_columns, at(0)).unwrap()
        };
        upsert_scd_type_1_at(&uri, with_name(Some("a")), &["id"], &config, NONE, at(1)).unwrap();

        let outcome = upsert_scd_type_1_at(&uri, with_name(None), &["id"], &config, NONE, at(2)).unwrap();
        assert_eq!(outcome.metrics.updated, 1);
        assert_eq!(current(&uri).value(0, "name"), Some(&Value::Null));
    }

    #[test]
    fn test_duplicate_source_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let uri = table_uri(&dir);
        let config = get_default_config();
        let err = upsert_scd_type_1_at(&uri, audited(&[Some(1), Some(1)], &["a", "b"], 1), &["id"], &config, NONE, at(1))
            .unwrap_err();
        assert!(matches!(err, EtlError::Merge(_)));
        assert!(!DeltaTable::exists(&uri).unwrap());
    }

    #[test]
    fn test_schema_drift_rejected() {
        let dir = TempDir::new().unwrap();
        let uri = table_uri(&dir);
        let config = get_default_config();
        upsert_scd_type_1_at(&uri, audited(&[Some(1)], &["a"], 1), &["id"], &config, NONE, at(1)).unwrap();

        let drifted = DataFrame::new(vec![Column::int64("id", [1]), Column::utf8("email", ["x@y"])]).unwrap();
        let err = upsert_scd_type_1_at(&uri, drifted.into(), &["id"], &config, NONE, at(2)).unwrap_err();
        assert!(matches!(err, EtlError::Schema(SchemaError::Incompatible(_))));
        assert_eq!(DeltaTable::open(&uri).unwrap().version(), 0);
    }

    #[test]
    fn test_non_finite_floats_rerun_is_noop() {
        let dir = TempDir::new().unwrap();
        let uri = table_uri(&dir);
        let config = get_default_config();
        let frame = || {
            let df = DataFrame::new(vec![
                Column::int64("id", [1, 2, 3]),
                Column::float64("score", [f64::NAN, f64::INFINITY, f64::NEG_INFINITY]),
            ])
            .unwrap();
            add_audit_columns_at(df.into(), &config.audit_columns, at(0)).unwrap()
        };
        upsert_scd_type_1_at(&uri, frame(), &["id"], &config, NONE, at(1)).unwrap();

        let stored = current(&uri);
        assert!(matches!(stored.value(row_for(&stored, 1), "score"), Some(Value::Float64(f)) if f.is_nan()));
        assert_eq!(stored.value(row_for(&stored, 3), "score"), Some(&Value::Float64(f64::NEG_INFINITY)));

        let outcome = upsert_scd_type_1_at(&uri, frame(), &["id"], &config, NONE, at(2)).unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.metrics.unchanged, 3);
    }

    fn score() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![
            Just(None),
            Just(Some(f64::NAN)),
            Just(Some(f64::INFINITY)),
            Just(Some(-0.0)),
            any::<f64>().prop_map(Some),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_identical_rerun_commits_nothing(
            rows in proptest::collection::vec(
                (score(), proptest::option::of(-1_000_000_000_000i64..4_000_000_000_000_000), proptest::option::of("[a-z ]{0,6}")),
                1..8,
            ),
        ) {
            let config = get_default_config();
            let frame = || {
                let df = DataFrame::new(vec![
                    Column::int64("id", 0..rows.len() as i64),
                    Column::float64("score", rows.iter().map(|r| r.0)),
                    Column::timestamp("seen_at", rows.iter().map(|r| r.1.map_or(Value::Null, Value::timestamp_micros))),
                    Column::utf8("note", rows.iter().map(|r| r.2.clone())),
                ])
                .unwrap();
                add_audit_columns_at(df.into(), &config.audit_columns, at(0)).unwrap()
            };
            let dir = TempDir::new().unwrap();
            let uri = table_uri(&dir);
            upsert_scd_type_1_at(&uri, frame(), &["id"], &config, NONE, at(1)).unwrap();
            let before = current(&uri);

            let outcome = upsert_scd_type_1_at(&uri, frame(), &["id"], &config, NONE, at(2)).unwrap();
            prop_assert!(!outcome.committed);
            prop_assert_eq!(outcome.version, 0);
            prop_assert_eq!(outcome.metrics.unchanged, rows.len());
            prop_assert_eq!(current(&uri), before);
        }
    }
}
