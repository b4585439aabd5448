//! Source adapters and the incremental watermark.
//!
//! Every source returns a [`Frame`] whose schema is known without reading
//! row data, and which supports row filtering. Failures are reported once;
//! nothing here retries.
//!
//! - [`source_delta`]: latest snapshot of a versioned table (lazy)
//! - [`source_parquet`]: parquet files matching a glob (lazy)
//! - [`source_csv`]: CSV files matching a glob (eager, types are inferred)

pub mod csv;
pub mod files;
#[cfg(feature = "parquet")]
pub mod parquet;

use std::fmt;
use tracing::debug;

pub use self::csv::source_csv;
#[cfg(feature = "parquet")]
pub use self::parquet::source_parquet;

use crate::error::EtlResult;
use crate::frame::{col, Frame, LazyFrame, Predicate, Value};
use crate::storage::DeltaTable;

/// Lazily read the current snapshot of the table at `table_uri`.
///
/// The table is opened immediately, so a missing table fails here rather
/// than when the frame is collected.
pub fn source_delta(table_uri: &str) -> EtlResult<Frame> {
    let table = DeltaTable::open(table_uri)?;
    debug!(source = %table_uri, version = table.version(), "Opened table source");
    let schema = table.schema().clone();
    let label = format!("table_scan({}@v{})", table_uri, table.version());
    Ok(Frame::Lazy(LazyFrame::new(schema, label, move || {
        Ok(table.to_data_frame()?)
    })))
}

/// Highest incremental value already loaded into a target.
#[derive(Debug, Clone, PartialEq)]
pub enum Watermark {
    /// Nothing loaded yet: every source row is new.
    Unbounded,
    Value(Value),
}

impl Watermark {
    /// Rows newer than the watermark.
    pub fn predicate(&self, column: &str) -> Predicate {
        match self {
            Watermark::Unbounded => col(column).is_not_null(),
            Watermark::Value(value) => col(column).gt(value.clone()),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Watermark::Unbounded => None,
            Watermark::Value(value) => Some(value),
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Unbounded => f.write_str("unbounded"),
            Watermark::Value(value) => write!(f, "{}", value),
        }
    }
}

/// Current maximum of `column_name` in the table at `table_uri`.
///
/// A missing or empty table, or an all-null column, yields
/// [`Watermark::Unbounded`].
pub fn get_incremental_column_value(table_uri: &str, column_name: &str) -> EtlResult<Watermark> {
    if !DeltaTable::exists(table_uri)? {
        debug!(table = %table_uri, "Target does not exist, watermark is unbounded");
        return Ok(Watermark::Unbounded);
    }
    let df = DeltaTable::open(table_uri)?.to_data_frame()?;
    let watermark = match df.column(column_name)?.max() {
        Some(value) => Watermark::Value(value.clone()),
        None => Watermark::Unbounded,
    };
    debug!(table = %table_uri, column = %column_name, %watermark, "Read watermark");
    Ok(watermark)
}
