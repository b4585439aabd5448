//! Commit log entries.
//!
//! Each version of a table is described by one JSON file under
//! `_delta_log/`, named by the zero-padded version number:
//!
//! ```text
//! my_table/
//! ├── _delta_log/
//! │   ├── 00000000000000000000.json   CREATE
//! │   └── 00000000000000000001.json   MERGE
//! ├── part-00000-<uuid>.jsonl
//! └── part-00001-<uuid>.jsonl
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::frame::Schema;

pub const LOG_DIR: &str = "_delta_log";

/// Kind of write that produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Write,
    Overwrite,
    Append,
    Merge,
    #[serde(rename = "MERGE_SCD2")]
    MergeScd2,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "CREATE",
            Operation::Write => "WRITE",
            Operation::Overwrite => "OVERWRITE",
            Operation::Append => "APPEND",
            Operation::Merge => "MERGE",
            Operation::MergeScd2 => "MERGE_SCD2",
        };
        f.write_str(name)
    }
}

/// Row counts reported by a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeMetrics {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl MergeMetrics {
    /// Whether the merge changed anything.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0
    }
}

/// One committed table version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    /// Merge condition, rendered as SQL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    pub schema: Schema,
    /// Snapshot data file, relative to the table root.
    pub data_file: String,
    pub num_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MergeMetrics>,
}

/// Log file name for `version`.
pub fn log_file_name(version: i64) -> String {
    format!("{:020}.json", version)
}

/// Temporary name a commit entry is written under before it is published.
pub fn staged_log_file_name(version: i64) -> String {
    format!(".{:020}.{}.json.tmp", version, uuid::Uuid::new_v4())
}

/// Parse a log file name back into its version.
pub fn parse_log_file_name(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(".json")?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Fresh data file name for `version`.
pub fn data_file_name(version: i64) -> String {
    format!("part-{:05}-{}.jsonl", version, uuid::Uuid::new_v4())
}
