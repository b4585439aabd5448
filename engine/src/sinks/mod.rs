//! Sinks: merge a final frame into a versioned target table.
//!
//! - [`upsert_scd_type_1`]: overwrite changed rows in place
//! - [`upsert_scd_type_2`]: keep history with validity intervals
//!
//! Both create the target on first use, refuse schema drift, and commit
//! nothing when the merge would not change the table, so re-running a load
//! with the same input is a no-op.

pub mod scd1;
pub mod scd2;

use std::collections::{HashMap, HashSet};

pub use scd1::{upsert_scd_type_1, upsert_scd_type_1_at};
pub use scd2::upsert_scd_type_2;

use crate::error::{EtlError, EtlResult, SchemaError};
use crate::frame::{DataFrame, Value};
use crate::storage::{MergeMetrics, Operation};

/// What a sink did to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    pub table_uri: String,
    /// Table version after the sink ran.
    pub version: i64,
    /// Whether a new version was committed.
    pub committed: bool,
    pub operation: Option<Operation>,
    pub metrics: MergeMetrics,
}

impl SinkOutcome {
    /// Rows inserted or rewritten.
    pub fn rows_written(&self) -> usize {
        self.metrics.inserted + self.metrics.updated
    }
}

/// Reorder `source` to the target's column order, failing on any drift.
pub(crate) fn align_to_target(source: &DataFrame, target: &DataFrame) -> EtlResult<DataFrame> {
    let source_schema = source.schema();
    let target_schema = target.schema();
    if !source_schema.same_fields(&target_schema) {
        let describe = |df: &DataFrame| {
            df.schema()
                .fields()
                .iter()
                .map(|f| format!("{}: {}", f.name, f.data_type))
                .collect::<Vec<_>>()
                .join(", ")
        };
        return Err(SchemaError::Incompatible(format!(
            "source [{}] does not match target [{}]",
            describe(source),
            describe(target)
        ))
        .into());
    }
    Ok(source.select(&target_schema.names())?)
}

/// Fail when two source rows share a primary key tuple.
pub(crate) fn ensure_unique_keys(df: &DataFrame, positions: &[usize]) -> EtlResult<()> {
    let mut seen = HashSet::with_capacity(df.height());
    for row in 0..df.height() {
        let key = df.key_at(row, positions);
        if key.iter().any(|k| k.is_null()) {
            continue;
        }
        if !seen.insert(key) {
            let rendered: Vec<String> = positions
                .iter()
                .map(|&p| df.columns()[p].values()[row].to_string())
                .collect();
            return Err(EtlError::Merge(format!(
                "multiple source rows share primary key ({})",
                rendered.join(", ")
            )));
        }
    }
    Ok(())
}

/// Columns compared and copied on update: everything except `excluded`.
pub(crate) fn value_columns(df: &DataFrame, excluded: &[&str]) -> Vec<String> {
    df.column_names()
        .into_iter()
        .filter(|name| !excluded.contains(name))
        .map(str::to_string)
        .collect()
}

/// Column name to position, shared by source and target once aligned.
pub(crate) fn column_index(df: &DataFrame) -> HashMap<&str, usize> {
    df.columns()
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name(), i))
        .collect()
}

/// Named lookup into one row, for evaluating merge expressions.
pub(crate) fn row_lookup<'a>(
    df: &'a DataFrame,
    index: &'a HashMap<&'a str, usize>,
    row: usize,
) -> impl Fn(&str) -> Option<&'a Value> + 'a {
    move |name: &str| index.get(name).map(|&i| &df.columns()[i].values()[row])
}
