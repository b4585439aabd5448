//! Error types for the Lakeflow ETL core.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`FrameError`] - Frame construction and column access errors
//! - [`SchemaError`] - Schema validation and compatibility errors
//! - [`StorageError`] - Versioned table and file source errors
//! - [`EtlError`] - Top-level error returned by transforms, sinks and flows
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Frame Errors
// =============================================================================

/// Errors raised while building or querying a frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    /// A named column is absent from the frame.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Two columns share the same name.
    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    /// A column does not have the frame's row count.
    #[error("Column '{column}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// A value does not match its column type.
    #[error("Column '{column}' expects {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    /// A column that must be fully populated contains a null.
    #[error("Column '{0}' contains a null value")]
    NullValue(String),

    /// Options passed to a frame operation are inconsistent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

// =============================================================================
// Schema Errors
// =============================================================================

/// Errors raised when a frame's schema violates the flow contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// The incremental column was dropped by a transform.
    #[error("Incremental column `{0}` is not in the dataframe. Was it dropped in a transform?")]
    MissingIncrementalColumn(String),

    /// One or more audit columns are missing.
    #[error("Audit columns missing from the dataframe: {}. Was one dropped in a transform?", .0.join(", "))]
    MissingAuditColumns(Vec<String>),

    /// A column name contains characters other than alphanumerics and underscores.
    #[error("Column names must contain only alphanumeric characters and underscores. Invalid column name: `{0}`")]
    InvalidColumnName(String),

    /// A column uses a name reserved for audit metadata.
    #[error("Column `{0}` is reserved for audit metadata")]
    ReservedColumn(String),

    /// Normalization mapped two columns onto the same name.
    #[error("Column names `{first}` and `{second}` both normalize to `{normalized}`")]
    DuplicateColumn {
        first: String,
        second: String,
        normalized: String,
    },

    /// Source and target schemas cannot be merged.
    #[error("Schema mismatch: {0}")]
    Incompatible(String),

    /// A lazy computation produced a different schema than declared.
    #[error("Plan produced columns [{actual}], expected [{expected}]")]
    PlanMismatch { expected: String, actual: String },
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors from the versioned table store and file-based sources.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Table or file set does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A table already exists where a new one was requested.
    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    /// Failed to read or write a file.
    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV decoding failed.
    #[error("CSV error in '{path}': {message}")]
    Csv { path: String, message: String },

    /// Parquet decoding failed.
    #[error("Parquet error in '{path}': {message}")]
    Parquet { path: String, message: String },

    /// Only local paths and `file://` URIs are supported.
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// Another writer committed the same version first.
    #[error("Commit conflict: version {version} of '{uri}' already exists")]
    CommitConflict { uri: String, version: i64 },

    /// A commit entry or data file cannot be interpreted.
    #[error("Corrupt table '{uri}': {message}")]
    Corrupt { uri: String, message: String },

    /// Invalid glob pattern.
    #[error("Invalid glob pattern '{pattern}': {message}")]
    Glob { pattern: String, message: String },
}

impl StorageError {
    /// Wrap an IO error with the path it occurred on.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return StorageError::NotFound(path.into());
        }
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

// =============================================================================
// ETL Errors (top-level)
// =============================================================================

/// Top-level error returned by transforms, sinks and [`crate::flow::Flow::run`].
///
/// All variants are fatal to the current run; nothing is retried internally.
#[derive(Debug, Error)]
pub enum EtlError {
    /// The flow was assembled incompletely.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Schema validation failed.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Frame operation failed (e.g. missing column).
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Source unreadable or sink unwritable.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Merge could not be applied to the target table.
    #[error("Merge error: {0}")]
    Merge(String),
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Storage(StorageError::Json(err))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for frame operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for transforms, sinks and flows.
pub type EtlResult<T> = Result<T, EtlError>;
