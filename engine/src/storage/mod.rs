//! Versioned table store.
//!
//! A table is a directory holding a commit log (`_delta_log/`) and one
//! JSON-lines snapshot file per version. Every commit writes a full
//! copy-on-write snapshot, so reading any version touches exactly one data
//! file and readers never observe a partial write.
//!
//! Commit entries are staged under a temporary name and hard-linked into
//! place, so an entry is either complete or absent. When two writers race
//! for the same version, the second link fails and the commit returns
//! [`StorageError::CommitConflict`] instead of overwriting history.

pub mod codec;
pub mod log;

use chrono::Utc;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub use log::{CommitEntry, MergeMetrics, Operation};

use crate::error::{EtlResult, SchemaError, StorageError, StorageResult};
use crate::frame::{DataFrame, Schema};

/// Resolve a table URI to a local path. Accepts plain paths and `file://`.
pub fn resolve_uri(uri: &str) -> StorageResult<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    match uri.split_once("://") {
        Some((scheme, _)) => Err(StorageError::UnsupportedScheme(scheme.to_string())),
        None => Ok(PathBuf::from(uri)),
    }
}

/// How [`write_table`] treats an existing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    ErrorIfExists,
    Overwrite,
    Append,
}

/// Handle on one version of a table.
#[derive(Debug, Clone)]
pub struct DeltaTable {
    uri: String,
    root: PathBuf,
    entry: CommitEntry,
}

impl DeltaTable {
    /// Whether a table with at least one committed version lives at `uri`.
    pub fn exists(uri: &str) -> StorageResult<bool> {
        let root = resolve_uri(uri)?;
        Ok(latest_version(&root)?.is_some())
    }

    /// Open the latest version.
    pub fn open(uri: &str) -> StorageResult<Self> {
        let root = resolve_uri(uri)?;
        let version = latest_version(&root)?.ok_or_else(|| StorageError::NotFound(uri.to_string()))?;
        Self::load(uri, root, version)
    }

    /// Open a historical version.
    pub fn open_at_version(uri: &str, version: i64) -> StorageResult<Self> {
        let root = resolve_uri(uri)?;
        Self::load(uri, root, version)
    }

    /// Create a new table at version 0 holding `df`.
    pub fn create(uri: &str, df: &DataFrame) -> StorageResult<Self> {
        let root = resolve_uri(uri)?;
        fs::create_dir_all(root.join(log::LOG_DIR))
            .map_err(|e| StorageError::io(root.display().to_string(), e))?;
        if latest_version(&root)?.is_some() {
            return Err(StorageError::AlreadyExists(uri.to_string()));
        }
        let entry = write_version(uri, &root, 0, df, Operation::Create, None, None)?;
        info!(table = %uri, rows = df.height(), "Created table");
        Ok(Self {
            uri: uri.to_string(),
            root,
            entry,
        })
    }

    fn load(uri: &str, root: PathBuf, version: i64) -> StorageResult<Self> {
        let path = root.join(log::LOG_DIR).join(log::log_file_name(version));
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(format!("{}@v{}", uri, version)),
            _ => StorageError::io(path.display().to_string(), e),
        })?;
        let entry: CommitEntry = serde_json::from_str(&content)?;
        if entry.version != version {
            return Err(StorageError::Corrupt {
                uri: uri.to_string(),
                message: format!("log file for version {} records version {}", version, entry.version),
            });
        }
        Ok(Self {
            uri: uri.to_string(),
            root,
            entry,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> i64 {
        self.entry.version
    }

    pub fn schema(&self) -> &Schema {
        &self.entry.schema
    }

    pub fn num_rows(&self) -> usize {
        self.entry.num_rows
    }

    pub fn entry(&self) -> &CommitEntry {
        &self.entry
    }

    /// Read this version's snapshot.
    pub fn to_data_frame(&self) -> StorageResult<DataFrame> {
        let path = self.root.join(&self.entry.data_file);
        let file = File::open(&path).map_err(|e| StorageError::io(path.display().to_string(), e))?;
        let df = codec::read_rows(file, &self.entry.schema, &path.display().to_string())?;
        if df.height() != self.entry.num_rows {
            return Err(StorageError::Corrupt {
                uri: self.uri.clone(),
                message: format!(
                    "version {} records {} rows, data file holds {}",
                    self.entry.version,
                    self.entry.num_rows,
                    df.height()
                ),
            });
        }
        Ok(df)
    }

    /// Commit entries from this version back to version 0, newest first.
    pub fn history(&self) -> StorageResult<Vec<CommitEntry>> {
        (0..=self.entry.version)
            .rev()
            .map(|v| Self::load(&self.uri, self.root.clone(), v).map(|t| t.entry))
            .collect()
    }

    /// Commit `df` as the next version and advance this handle to it.
    pub fn commit(
        &mut self,
        df: &DataFrame,
        operation: Operation,
        predicate: Option<String>,
        metrics: Option<MergeMetrics>,
    ) -> StorageResult<i64> {
        let version = self.entry.version + 1;
        self.entry = write_version(&self.uri, &self.root, version, df, operation, predicate, metrics)?;
        info!(table = %self.uri, version, %operation, rows = df.height(), "Committed version");
        Ok(version)
    }
}

/// Write `df` to `uri` according to `mode`.
pub fn write_table(uri: &str, df: &DataFrame, mode: WriteMode) -> EtlResult<DeltaTable> {
    if !DeltaTable::exists(uri)? {
        return Ok(DeltaTable::create(uri, df)?);
    }
    let mut table = DeltaTable::open(uri)?;
    match mode {
        WriteMode::ErrorIfExists => return Err(StorageError::AlreadyExists(uri.to_string()).into()),
        WriteMode::Overwrite => {
            table.commit(df, Operation::Overwrite, None, None)?;
        }
        WriteMode::Append => {
            if !table.schema().same_fields(&df.schema()) {
                return Err(SchemaError::Incompatible(format!(
                    "cannot append columns [{}] to table with columns [{}]",
                    df.column_names().join(", "),
                    table.schema().names().join(", ")
                ))
                .into());
            }
            let combined = table.to_data_frame()?.vstack(df)?;
            table.commit(&combined, Operation::Append, None, None)?;
        }
    }
    Ok(table)
}

fn latest_version(root: &Path) -> StorageResult<Option<i64>> {
    let log_dir = root.join(log::LOG_DIR);
    let entries = match fs::read_dir(&log_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(log_dir.display().to_string(), e)),
    };
    let mut latest = None;
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(log_dir.display().to_string(), e))?;
        if let Some(version) = entry.file_name().to_str().and_then(log::parse_log_file_name) {
            latest = latest.max(Some(version));
        }
    }
    Ok(latest)
}

fn write_version(
    uri: &str,
    root: &Path,
    version: i64,
    df: &DataFrame,
    operation: Operation,
    predicate: Option<String>,
    metrics: Option<MergeMetrics>,
) -> StorageResult<CommitEntry> {
    let data_file = log::data_file_name(version);
    let data_path = root.join(&data_file);
    let file = File::create(&data_path).map_err(|e| StorageError::io(data_path.display().to_string(), e))?;
    codec::write_rows(file, df).map_err(|e| StorageError::io(data_path.display().to_string(), e))?;

    let entry = CommitEntry {
        version,
        timestamp: Utc::now(),
        operation,
        predicate,
        schema: df.schema(),
        data_file,
        num_rows: df.height(),
        metrics,
    };
    let log_dir = root.join(log::LOG_DIR);
    let log_path = log_dir.join(log::log_file_name(version));
    let staged_path = log_dir.join(log::staged_log_file_name(version));
    let published = stage_entry(&staged_path, &entry).and_then(|()| {
        // hard_link fails if the target exists, so the entry appears whole or not at all
        fs::hard_link(&staged_path, &log_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => StorageError::CommitConflict {
                uri: uri.to_string(),
                version,
            },
            _ => StorageError::io(log_path.display().to_string(), e),
        })
    });
    let _ = fs::remove_file(&staged_path);
    if let Err(e) = published {
        // The snapshot we wrote is unreferenced; drop it.
        let _ = fs::remove_file(&data_path);
        return Err(e);
    }
    debug!(table = %uri, version, data_file = %entry.data_file, "Wrote commit entry");
    Ok(entry)
}

fn stage_entry(path: &Path, entry: &CommitEntry) -> StorageResult<()> {
    let body = serde_json::to_vec_pretty(entry)?;
    let mut file = File::create(path).map_err(|e| StorageError::io(path.display().to_string(), e))?;
    file.write_all(&body)
        .and_then(|()| file.sync_all())
        .map_err(|e| StorageError::io(path.display().to_string(), e))
}
