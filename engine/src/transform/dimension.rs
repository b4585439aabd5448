//! Dimension surrogate key lookups for fact loads.
//!
//! Facts carry business keys (`customer_bk`); dimensions map them to
//! surrogate keys (`customer_sk`). Facts without a matching dimension row get
//! the configured default key (`-1` by default).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::{AuditRole, Config};
use crate::error::{EtlResult, FrameError, SchemaError};
use crate::frame::{Column, DataFrame, DataType, KeyValue, Value};

/// Index dimension rows by business key tuple.
fn index_dimension(
    dimension: &DataFrame,
    business_key_columns: &[String],
    filter: impl Fn(usize) -> bool,
) -> EtlResult<HashMap<Vec<KeyValue>, Vec<usize>>> {
    let positions = dimension.positions(business_key_columns)?;
    let mut index: HashMap<Vec<KeyValue>, Vec<usize>> = HashMap::new();
    for row in (0..dimension.height()).filter(|&r| filter(r)) {
        index.entry(dimension.key_at(row, &positions)).or_default().push(row);
    }
    Ok(index)
}

fn surrogate_keys<'a>(dimension: &'a DataFrame, surrogate_key_column: &str) -> EtlResult<&'a Column> {
    let column = dimension.column(surrogate_key_column)?;
    if column.data_type() != DataType::Int64 {
        return Err(FrameError::TypeMismatch {
            column: surrogate_key_column.to_string(),
            expected: DataType::Int64.to_string(),
            actual: column.data_type().to_string(),
        }
        .into());
    }
    Ok(column)
}

fn attach(
    fact: &DataFrame,
    business_key_columns: &[String],
    keep_key_columns: bool,
    surrogate_key_column: &str,
    keys: Vec<Value>,
) -> EtlResult<DataFrame> {
    let mut out = fact.clone();
    if !keep_key_columns {
        out = out.drop(business_key_columns)?;
    }
    let column = Column::new(surrogate_key_column, DataType::Int64, keys)?;
    Ok(out.with_column(column)?)
}

fn owned(columns: &[impl AsRef<str>]) -> Vec<String> {
    columns.iter().map(|c| c.as_ref().to_string()).collect()
}

/// Append `surrogate_key_column` to `fact`, looked up from the current rows
/// of `dimension` by `business_key_columns`.
///
/// When the dimension carries the configured valid-to column, only rows
/// with a null valid-to are current. Otherwise the first matching row wins.
pub fn get_dimension_surrogate_key<S: AsRef<str>>(
    fact: &DataFrame,
    dimension: &DataFrame,
    business_key_columns: &[S],
    surrogate_key_column: &str,
    config: &Config,
    keep_key_columns: bool,
) -> EtlResult<DataFrame> {
    let business_keys = owned(business_key_columns);
    let fact_positions = fact.positions(&business_keys)?;
    let sk = surrogate_keys(dimension, surrogate_key_column)?;

    let valid_to = config
        .audit_column_name(AuditRole::ValidTo)
        .and_then(|name| dimension.column(name).ok());
    let index = index_dimension(dimension, &business_keys, |row| {
        valid_to.map_or(true, |c| c.values()[row].is_null())
    })?;

    let default = Value::Int64(config.surrogate_key_column.default_value);
    let keys = (0..fact.height())
        .map(|row| {
            let key = fact.key_at(row, &fact_positions);
            if key.iter().any(KeyValue::is_null) {
                return default.clone();
            }
            index
                .get(&key)
                .and_then(|rows| rows.first())
                .map(|&r| sk.values()[r].clone())
                .unwrap_or_else(|| default.clone())
        })
        .collect();

    attach(fact, &business_keys, keep_key_columns, surrogate_key_column, keys)
}

/// Like [`get_dimension_surrogate_key`], but picks the dimension row whose
/// `[valid_from, valid_to)` interval contains the fact's `as_of_column`.
pub fn get_dimension_historical_surrogate_key<S: AsRef<str>>(
    fact: &DataFrame,
    dimension: &DataFrame,
    business_key_columns: &[S],
    as_of_column: &str,
    surrogate_key_column: &str,
    config: &Config,
    keep_key_columns: bool,
) -> EtlResult<DataFrame> {
    let business_keys = owned(business_key_columns);
    let fact_positions = fact.positions(&business_keys)?;
    let as_of = fact.column(as_of_column)?;
    let sk = surrogate_keys(dimension, surrogate_key_column)?;

    let interval_names: Vec<&str> = [AuditRole::ValidFrom, AuditRole::ValidTo]
        .into_iter()
        .filter_map(|role| config.audit_column_name(role))
        .collect();
    let missing: Vec<String> = interval_names
        .iter()
        .filter(|name| dimension.index_of(name).is_none())
        .map(|name| name.to_string())
        .collect();
    if interval_names.len() != 2 || !missing.is_empty() {
        return Err(SchemaError::MissingAuditColumns(missing).into());
    }
    let valid_from = dimension.column(interval_names[0])?;
    let valid_to = dimension.column(interval_names[1])?;

    let index = index_dimension(dimension, &business_keys, |_| true)?;
    let default = Value::Int64(config.surrogate_key_column.default_value);

    let contains = |dim_row: usize, at: &Value| {
        let from = &valid_from.values()[dim_row];
        let to = &valid_to.values()[dim_row];
        let started = matches!(from.compare(at), Some(Ordering::Less | Ordering::Equal));
        let not_ended = to.is_null() || at.compare(to) == Some(Ordering::Less);
        started && not_ended
    };

    let keys = (0..fact.height())
        .map(|row| {
            let key = fact.key_at(row, &fact_positions);
            let at = &as_of.values()[row];
            if at.is_null() || key.iter().any(KeyValue::is_null) {
                return default.clone();
            }
            index
                .get(&key)
                .and_then(|rows| rows.iter().find(|&&r| contains(r, at)))
                .map(|&r| sk.values()[r].clone())
                .unwrap_or_else(|| default.clone())
        })
        .collect();

    attach(fact, &business_keys, keep_key_columns, surrogate_key_column, keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_default_config;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Timestamp(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap())
    }

    fn dimension() -> DataFrame {
        DataFrame::new(vec![
            Column::utf8("customer_bk", ["C1", "C1", "C2"]),
            Column::int64("customer_sk", [10, 11, 20]),
            Column::timestamp("__valid_from", [date(2023, 1, 1), date(2023, 6, 1), date(2023, 1, 1)]),
            Column::timestamp("__valid_to", [date(2023, 6, 1), Value::Null, Value::Null]),
        ])
        .unwrap()
    }

    #[test]
    fn test_current_surrogate_key() {
        let config = get_default_config();
        let fact = DataFrame::new(vec![
            Column::utf8("customer_bk", [Some("C1"), Some("C2"), Some("C3"), None]),
            Column::int64("amount", [100, 200, 300, 400]),
        ])
        .unwrap();

        let out = get_dimension_surrogate_key(&fact, &dimension(), &["customer_bk"], "customer_sk", &config, true)
            .unwrap();
        assert_eq!(out.column_names(), vec!["customer_bk", "amount", "customer_sk"]);
        assert_eq!(
            out.column("customer_sk").unwrap().values(),
            &[Value::Int64(11), Value::Int64(20), Value::Int64(-1), Value::Int64(-1)]
        );
    }

    #[test]
    fn test_drop_key_columns() {
        let config = get_default_config();
        let fact = DataFrame::new(vec![Column::utf8("customer_bk", ["C2"])]).unwrap();
        let out = get_dimension_surrogate_key(&fact, &dimension(), &["customer_bk"], "customer_sk", &config, false)
            .unwrap();
        assert_eq!(out.column_names(), vec!["customer_sk"]);
    }

    #[test]
    fn test_historical_surrogate_key() {
        let config = get_default_config();
        let fact = DataFrame::new(vec![
            Column::utf8("customer_bk", ["C1", "C1", "C1", "C2"]),
            Column::timestamp(
                "order_date",
                [date(2023, 3, 1), date(2023, 6, 1), date(2022, 1, 1), date(2024, 1, 1)],
            ),
        ])
        .unwrap();

        let out = get_dimension_historical_surrogate_key(
            &fact,
            &dimension(),
            &["customer_bk"],
            "order_date",
            "customer_sk",
            &config,
            true,
        )
        .unwrap();
        assert_eq!(
            out.column("customer_sk").unwrap().values(),
            &[Value::Int64(10), Value::Int64(11), Value::Int64(-1), Value::Int64(20)]
        );
    }

    #[test]
    fn test_historical_needs_interval_columns() {
        let config = get_default_config();
        let dimension = DataFrame::new(vec![
            Column::utf8("customer_bk", ["C1"]),
            Column::int64("customer_sk", [1]),
        ])
        .unwrap();
        let fact = DataFrame::new(vec![
            Column::utf8("customer_bk", ["C1"]),
            Column::timestamp("order_date", [date(2023, 1, 1)]),
        ])
        .unwrap();
        let err = get_dimension_historical_surrogate_key(
            &fact,
            &dimension,
            &["customer_bk"],
            "order_date",
            "customer_sk",
            &config,
            true,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::EtlError::Schema(SchemaError::MissingAuditColumns(ref cols)) if cols.len() == 2
        ));
    }
}
