//! # Lakeflow - incremental ETL into versioned tables
//!
//! Lakeflow reads landing data (versioned tables, parquet or CSV files),
//! keeps only rows newer than what the target already holds, cleans them up
//! and merges them into a versioned target table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Sources   │────▶│  Transform  │────▶│    Post-    │────▶│    Sink     │
//! │ (watermark) │     │   (fold)    │     │  transforms │     │ (SCD1/SCD2) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lakeflow::{get_default_landing_to_raw_flow, LandingToRawOptions, SourceType};
//!
//! let options = LandingToRawOptions {
//!     source_type: SourceType::Parquet,
//!     primary_key_columns: vec!["CustomerID".into()],
//!     ..LandingToRawOptions::default()
//! };
//! let report = get_default_landing_to_raw_flow("landing/customers", "raw/customers", options)?.run()?;
//! println!("Wrote {:?} rows", report.rows_written());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - Pipeline configuration
//! - [`logging`] - Tracing subscriber setup for binaries
//! - [`frame`] - Eager and lazy tabular frames
//! - [`storage`] - Versioned table store
//! - [`sources`] - Source adapters and watermarks
//! - [`transform`] - Frame transforms
//! - [`merge`] - Merge predicate builders
//! - [`sinks`] - SCD type 1 and type 2 upserts
//! - [`flow`] - Flow builder and presets

// Core modules
pub mod config;
pub mod error;
pub mod helpers;
pub mod logging;

// Data
pub mod frame;
pub mod storage;

// Pipeline stages
pub mod merge;
pub mod sinks;
pub mod sources;
pub mod transform;

// Orchestration
pub mod flow;

// =============================================================================
// Re-exports - Errors
// =============================================================================

pub use error::{EtlError, EtlResult, FrameError, SchemaError, StorageError};

// =============================================================================
// Re-exports - Config
// =============================================================================

pub use config::{get_default_config, AuditColumn, AuditDefault, AuditRole, Config, IncrementalColumn, SurrogateKeyColumn};

// =============================================================================
// Re-exports - Frames
// =============================================================================

pub use frame::{col, Column, DataFrame, DataType, Field, Frame, LazyFrame, Predicate, Schema, Value};

// =============================================================================
// Re-exports - Storage
// =============================================================================

pub use storage::{write_table, CommitEntry, DeltaTable, MergeMetrics, Operation, WriteMode};

// =============================================================================
// Re-exports - Sources
// =============================================================================

pub use sources::{get_incremental_column_value, source_csv, source_delta, Watermark};

#[cfg(feature = "parquet")]
pub use sources::source_parquet;

// =============================================================================
// Re-exports - Transforms
// =============================================================================

pub use transform::{
    add_audit_columns,
    add_audit_columns_at,
    apply_scd_type_2,
    character_translation,
    deduplicate,
    get_dimension_historical_surrogate_key,
    get_dimension_surrogate_key,
    normalize_column_names,
    normalize_column_names_default,
    reorder_columns,
    to_snake_case,
};

// =============================================================================
// Re-exports - Merge and sinks
// =============================================================================

pub use helpers::quote_identifier;
pub use merge::{build_merge_predicate, build_when_matched_update_columns, build_when_matched_update_predicate, MergeExpr};
pub use sinks::{upsert_scd_type_1, upsert_scd_type_1_at, upsert_scd_type_2, SinkOutcome};

// =============================================================================
// Re-exports - Flow
// =============================================================================

pub use flow::{
    get_default_flow,
    get_default_landing_to_raw_flow,
    Flow,
    FlowReport,
    FlowState,
    LandingToRawOptions,
    LoadType,
    SourceType,
    TransformInput,
    NO_EXCEPT,
};
