//! Primary-key deduplication.

use std::collections::HashSet;

use crate::error::{EtlResult, FrameError};
use crate::frame::{DataFrame, Frame};

/// Empty order-column list, for deduplicating without an ordering.
pub const NO_ORDER: &[&str] = &[];

/// Keep exactly one row per primary-key tuple.
///
/// With `order_columns`, rows are stably sorted on them (descending when
/// `order_descending`) and the first row of each key wins, so ties keep the
/// earliest row in input order. Without order columns the first occurrence
/// wins. An empty key list deduplicates on all columns.
///
/// Surviving rows keep their input order.
pub fn deduplicate<K, O>(
    frame: Frame,
    primary_key_columns: &[K],
    order_columns: &[O],
    order_descending: bool,
) -> EtlResult<Frame>
where
    K: AsRef<str>,
    O: AsRef<str>,
{
    let schema = frame.schema();
    schema.require(primary_key_columns)?;
    schema.require(order_columns)?;

    let keys: Vec<String> = if primary_key_columns.is_empty() {
        schema.names().into_iter().map(str::to_string).collect()
    } else {
        primary_key_columns.iter().map(|k| k.as_ref().to_string()).collect()
    };
    let order: Vec<String> = order_columns.iter().map(|c| c.as_ref().to_string()).collect();

    frame.map(schema, "deduplicate", move |df| {
        Ok(deduplicate_frame(&df, &keys, &order, order_descending)?)
    })
}

fn deduplicate_frame(
    df: &DataFrame,
    keys: &[String],
    order: &[String],
    descending: bool,
) -> Result<DataFrame, FrameError> {
    let key_positions = df.positions(keys)?;
    let order_keys: Vec<(usize, bool)> = df
        .positions(order)?
        .into_iter()
        .map(|p| (p, descending))
        .collect();

    let candidates = if order_keys.is_empty() {
        (0..df.height()).collect()
    } else {
        df.sorted_indices(&order_keys)
    };

    let mut seen = HashSet::with_capacity(df.height());
    let mut survivors: Vec<usize> = candidates
        .into_iter()
        .filter(|&row| seen.insert(df.key_at(row, &key_positions)))
        .collect();
    survivors.sort_unstable();
    Ok(df.take(&survivors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use crate::frame::{Column, KeyValue, Value};
    use proptest::prelude::*;

    fn batches() -> DataFrame {
        DataFrame::new(vec![
            Column::int64("id", [1, 2, 3, 1, 2]),
            Column::utf8("name", ["Alice", "Bob", "Charlie", "AliceS", "BobB"]),
            Column::int64("batch_id", [1, 1, 1, 2, 2]),
        ])
        .unwrap()
    }

    #[test]
    fn test_latest_batch_wins() {
        let out = deduplicate(batches().into(), &["id"], &["batch_id"], true)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(
            out.column("name").unwrap().values(),
            &[Value::from("Charlie"), Value::from("AliceS"), Value::from("BobB")]
        );
    }

    #[test]
    fn test_ascending_keeps_earliest() {
        let out = deduplicate(batches().into(), &["id"], &["batch_id"], false)
            .unwrap()
            .collect()
            .unwrap();
        assert_eq!(
            out.column("name").unwrap().values(),
            &[Value::from("Alice"), Value::from("Bob"), Value::from("Charlie")]
        );
    }

    #[test]
    fn test_ties_keep_first_row() {
        let df = DataFrame::new(vec![
            Column::int64("id", [1, 1]),
            Column::utf8("tag", ["first", "second"]),
            Column::int64("v", [5, 5]),
        ])
        .unwrap();
        let out = deduplicate(df.into(), &["id"], &["v"], true).unwrap().collect().unwrap();
        assert_eq!(out.value(0, "tag"), Some(&Value::from("first")));
    }

    #[test]
    fn test_empty_key_means_distinct_rows() {
        let df = DataFrame::new(vec![
            Column::int64("a", [1, 1, 2]),
            Column::int64("b", [1, 1, 1]),
        ])
        .unwrap();
        let out = deduplicate(df.into(), NO_ORDER, NO_ORDER, true).unwrap().collect().unwrap();
        assert_eq!(out.height(), 2);
    }

    #[test]
    fn test_missing_key_column() {
        let err = deduplicate(batches().into(), &["nope"], NO_ORDER, true).unwrap_err();
        assert!(matches!(err, EtlError::Frame(FrameError::ColumnNotFound(ref c)) if c == "nope"));
    }

    #[test]
    fn test_lazy_input_stays_lazy() {
        let lazy = crate::frame::LazyFrame::from_frame(batches());
        let out = deduplicate(lazy.into(), &["id"], &["batch_id"], true).unwrap();
        assert!(out.is_lazy());
        assert_eq!(out.collect().unwrap().height(), 3);
    }

    proptest! {
        #[test]
        fn prop_one_row_per_key(ids in proptest::collection::vec(0i64..6, 0..40)) {
            let order: Vec<i64> = (0..ids.len() as i64).collect();
            let df = DataFrame::new(vec![
                Column::int64("id", ids.clone()),
                Column::int64("seq", order),
            ]).unwrap();
            let out = deduplicate(df.into(), &["id"], &["seq"], true).unwrap().collect().unwrap();

            let distinct: HashSet<i64> = ids.iter().copied().collect();
            prop_assert_eq!(out.height(), distinct.len());
            let survivors: HashSet<KeyValue> =
                out.column("id").unwrap().values().iter().map(Value::key).collect();
            prop_assert_eq!(survivors.len(), distinct.len());
            for key in survivors {
                prop_assert!(matches!(key, KeyValue::Int64(i) if distinct.contains(&i)));
            }
        }
    }
}
