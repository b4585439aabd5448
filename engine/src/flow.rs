//! Flow orchestration: sources, transforms, post-transforms and one sink.
//!
//! ```text
//!   target ──► watermark
//!                 │
//!   sources ──► filter(col > watermark) ──► transforms (fold) ──► post-transforms
//!                                                                     │
//!                                      sink ◄── post-validation ◄─────┘
//! ```
//!
//! A [`Flow`] is assembled with chained `add_*` calls and executed once with
//! [`Flow::run`]. Every failure is fatal to the run and nothing is written
//! unless post-validation passes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, info_span};

use crate::config::{get_default_config, Config};
use crate::error::{EtlError, EtlResult, SchemaError};
use crate::frame::{Frame, Schema};
use crate::sinks::{upsert_scd_type_1, upsert_scd_type_2, SinkOutcome};
use crate::sources::{get_incremental_column_value, source_csv, source_delta, Watermark};
use crate::transform::{add_audit_columns, deduplicate, normalize_column_names, normalize_column_names_default, reorder_columns};

static COLUMN_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").expect("valid column name pattern"));

// =============================================================================
// Types
// =============================================================================

/// Input of a custom transform.
///
/// The first transform receives every source by alias; each later one
/// receives the frame its predecessor returned.
pub enum TransformInput {
    Sources(BTreeMap<String, Frame>),
    Frame(Frame),
}

impl TransformInput {
    /// The single frame: the previous transform's output, or the only source.
    pub fn into_frame(self) -> EtlResult<Frame> {
        match self {
            TransformInput::Frame(frame) => Ok(frame),
            TransformInput::Sources(sources) if sources.len() == 1 => sources
                .into_values()
                .next()
                .ok_or_else(|| EtlError::Configuration("no source frame".into())),
            TransformInput::Sources(sources) => Err(EtlError::Configuration(format!(
                "{} sources need a transform to combine them",
                sources.len()
            ))),
        }
    }

    /// Source frames by alias. Fails when a previous transform already
    /// combined them.
    pub fn into_sources(self) -> EtlResult<BTreeMap<String, Frame>> {
        match self {
            TransformInput::Sources(sources) => Ok(sources),
            TransformInput::Frame(_) => Err(EtlError::Configuration(
                "sources were already combined by an earlier transform".into(),
            )),
        }
    }
}

/// Lifecycle of a [`Flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Unconfigured,
    Configured,
    Validated,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Unconfigured => "unconfigured",
            FlowState::Configured => "configured",
            FlowState::Validated => "validated",
            FlowState::Running => "running",
            FlowState::Completed => "completed",
            FlowState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a successful [`Flow::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlowReport {
    /// Watermark read from the target before the sources were filtered.
    pub watermark: Watermark,
    /// `None` for custom sinks.
    pub outcome: Option<SinkOutcome>,
}

impl FlowReport {
    pub fn rows_written(&self) -> Option<usize> {
        self.outcome.as_ref().map(SinkOutcome::rows_written)
    }
}

type SourceFn = Box<dyn FnOnce() -> EtlResult<Frame>>;
type TransformFn = Box<dyn FnOnce(TransformInput, &Config) -> EtlResult<Frame>>;
type PostTransformFn = Box<dyn FnOnce(Frame, &Config) -> EtlResult<Frame>>;
type SinkFn = Box<dyn FnOnce(Frame, &Config) -> EtlResult<Option<SinkOutcome>>>;
type WatermarkFn = Box<dyn FnOnce(&Config) -> EtlResult<Watermark>>;

struct SourceEntry {
    alias: String,
    read: SourceFn,
    incremental: bool,
}

struct PostTransform {
    name: &'static str,
    apply: PostTransformFn,
}

struct SinkEntry {
    target: String,
    write: SinkFn,
    watermark: WatermarkFn,
}

fn owned<S: AsRef<str>>(columns: &[S]) -> Vec<String> {
    columns.iter().map(|c| c.as_ref().to_string()).collect()
}

// =============================================================================
// Flow
// =============================================================================

/// An ETL pipeline under construction.
///
/// ```rust,ignore
/// let report = Flow::new()
///     .add_default_config()
///     .add_source_delta_table("landing/customers", "customers", true)
///     .add_default_post_transforms()
///     .add_sink_upsert_scd_type_1("raw/customers", &["id"], NO_EXCEPT)
///     .run()?;
/// ```
pub struct Flow {
    config: Option<Config>,
    sources: Vec<SourceEntry>,
    transforms: Vec<TransformFn>,
    post_transforms: Vec<PostTransform>,
    sink: Option<SinkEntry>,
    state: FlowState,
}

/// No columns excluded from an SCD type 1 comparison.
pub const NO_EXCEPT: &[&str] = &[];

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("state", &self.state)
            .field("sources", &self.sources.iter().map(|s| s.alias.as_str()).collect::<Vec<_>>())
            .field("transforms", &self.transforms.len())
            .field("post_transforms", &self.post_transforms.iter().map(|p| p.name).collect::<Vec<_>>())
            .field("sink", &self.sink.as_ref().map(|s| s.target.as_str()))
            .finish()
    }
}

impl Flow {
    pub fn new() -> Self {
        Self {
            config: None,
            sources: Vec::new(),
            transforms: Vec::new(),
            post_transforms: Vec::new(),
            sink: None,
            state: FlowState::Unconfigured,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    fn configured(mut self) -> Self {
        if self.state == FlowState::Unconfigured {
            self.state = FlowState::Configured;
        }
        self
    }

    // -------------------------------------------------------------------------
    // Config
    // -------------------------------------------------------------------------

    pub fn add_default_config(self) -> Self {
        self.add_config_custom(get_default_config())
    }

    pub fn add_config_custom(mut self, config: Config) -> Self {
        self.config = Some(config);
        self.configured()
    }

    // -------------------------------------------------------------------------
    // Sources
    // -------------------------------------------------------------------------

    /// Read the latest snapshot of a versioned table.
    pub fn add_source_delta_table(self, table_uri: &str, alias: &str, incremental: bool) -> Self {
        let uri = table_uri.to_string();
        self.add_source_custom(alias, move || source_delta(&uri), incremental)
    }

    /// Read every parquet file matching `glob_uri`.
    pub fn add_source_parquet(self, glob_uri: &str, alias: &str, incremental: bool) -> Self {
        let uri = glob_uri.to_string();
        self.add_source_custom(alias, move || read_parquet(&uri), incremental)
    }

    /// Read every CSV file matching `glob_uri`.
    pub fn add_source_csv(self, glob_uri: &str, alias: &str, incremental: bool) -> Self {
        let uri = glob_uri.to_string();
        self.add_source_custom(alias, move || source_csv(&uri), incremental)
    }

    /// Register any frame producer. Incremental sources are filtered on the
    /// configured incremental column before transforms run.
    pub fn add_source_custom<F>(mut self, alias: &str, read: F, incremental: bool) -> Self
    where
        F: FnOnce() -> EtlResult<Frame> + 'static,
    {
        self.sources.push(SourceEntry {
            alias: alias.to_string(),
            read: Box::new(read),
            incremental,
        });
        self.configured()
    }

    // -------------------------------------------------------------------------
    // Transforms
    // -------------------------------------------------------------------------

    pub fn add_transform_custom<F>(mut self, transform: F) -> Self
    where
        F: FnOnce(TransformInput, &Config) -> EtlResult<Frame> + 'static,
    {
        self.transforms.push(Box::new(transform));
        self.configured()
    }

    fn add_post_transform(mut self, name: &'static str, apply: PostTransformFn) -> Self {
        self.post_transforms.push(PostTransform { name, apply });
        self.configured()
    }

    /// Keep one row per key, see [`deduplicate`]. An empty key list
    /// deduplicates on all columns.
    pub fn add_post_transform_deduplicate<K, O>(
        self,
        primary_key_columns: &[K],
        order_columns: &[O],
        order_descending: bool,
    ) -> Self
    where
        K: AsRef<str>,
        O: AsRef<str>,
    {
        let keys = owned(primary_key_columns);
        let order = owned(order_columns);
        self.add_post_transform(
            "deduplicate",
            Box::new(move |frame: Frame, _: &Config| deduplicate(frame, &keys, &order, order_descending)),
        )
    }

    /// Rename columns with the configured translation map and snake_case.
    pub fn add_post_transform_normalize_column_names(self) -> Self {
        self.add_post_transform(
            "normalize_column_names",
            Box::new(|frame: Frame, config: &Config| normalize_column_names_default(frame, config)),
        )
    }

    /// Rename columns with a caller-supplied strategy.
    pub fn add_post_transform_normalize_column_names_with<F>(self, strategy: F) -> Self
    where
        F: Fn(&str) -> String + 'static,
    {
        self.add_post_transform(
            "normalize_column_names",
            Box::new(move |frame: Frame, _: &Config| normalize_column_names(frame, strategy)),
        )
    }

    pub fn add_post_transform_audit_columns(self) -> Self {
        self.add_post_transform(
            "add_audit_columns",
            Box::new(|frame: Frame, config: &Config| add_audit_columns(frame, &config.audit_columns)),
        )
    }

    pub fn add_post_transform_reorder_columns<S: AsRef<str>>(self, leading: &[S]) -> Self {
        let leading = owned(leading);
        self.add_post_transform(
            "reorder_columns",
            Box::new(move |frame: Frame, _: &Config| reorder_columns(frame, &leading)),
        )
    }

    pub fn add_post_transform_custom<F>(self, transform: F) -> Self
    where
        F: FnOnce(Frame, &Config) -> EtlResult<Frame> + 'static,
    {
        self.add_post_transform("custom", Box::new(transform))
    }

    /// Deduplicate on all columns, normalize names, add audit columns.
    pub fn add_default_post_transforms(self) -> Self {
        self.add_post_transform_deduplicate(crate::transform::NO_ORDER, crate::transform::NO_ORDER, true)
            .add_post_transform_normalize_column_names()
            .add_post_transform_audit_columns()
    }

    // -------------------------------------------------------------------------
    // Sinks
    // -------------------------------------------------------------------------

    /// Upsert into `table_uri` with SCD type 1 semantics. The watermark is
    /// read from the same table.
    pub fn add_sink_upsert_scd_type_1<K, E>(
        mut self,
        table_uri: &str,
        primary_key_columns: &[K],
        except_columns: &[E],
    ) -> Self
    where
        K: AsRef<str>,
        E: AsRef<str>,
    {
        let uri = table_uri.to_string();
        let keys = owned(primary_key_columns);
        let except = owned(except_columns);
        let write_uri = uri.clone();
        self.sink = Some(SinkEntry {
            target: uri.clone(),
            write: Box::new(move |frame: Frame, config: &Config| {
                upsert_scd_type_1(&write_uri, frame, &keys, config, &except).map(Some)
            }),
            watermark: table_watermark(uri),
        });
        self.configured()
    }

    /// Upsert into `table_uri` with SCD type 2 history.
    pub fn add_sink_upsert_scd_type_2<K: AsRef<str>>(mut self, table_uri: &str, primary_key_columns: &[K]) -> Self {
        let uri = table_uri.to_string();
        let keys = owned(primary_key_columns);
        let write_uri = uri.clone();
        self.sink = Some(SinkEntry {
            target: uri.clone(),
            write: Box::new(move |frame: Frame, config: &Config| {
                upsert_scd_type_2(&write_uri, frame, &keys, config).map(Some)
            }),
            watermark: table_watermark(uri),
        });
        self.configured()
    }

    /// Hand the final frame to `write`. The watermark is unbounded, so
    /// incremental sources are read in full.
    pub fn add_sink_custom<F>(self, name: &str, write: F) -> Self
    where
        F: FnOnce(Frame, &Config) -> EtlResult<()> + 'static,
    {
        self.add_sink_custom_with_watermark(name, write, |_: &Config| Ok(Watermark::Unbounded))
    }

    /// Hand the final frame to `write`, filtering incremental sources with
    /// the value returned by `watermark`.
    pub fn add_sink_custom_with_watermark<F, W>(mut self, name: &str, write: F, watermark: W) -> Self
    where
        F: FnOnce(Frame, &Config) -> EtlResult<()> + 'static,
        W: FnOnce(&Config) -> EtlResult<Watermark> + 'static,
    {
        self.sink = Some(SinkEntry {
            target: name.to_string(),
            write: Box::new(move |frame: Frame, config: &Config| write(frame, config).map(|_| None)),
            watermark: Box::new(watermark),
        });
        self.configured()
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Execute the flow once.
    ///
    /// Registered sources, transforms and the sink are consumed; running a
    /// flow a second time fails with a configuration error.
    pub fn run(&mut self) -> EtlResult<FlowReport> {
        let span = info_span!("flow_run");
        let _enter = span.enter();

        if matches!(self.state, FlowState::Completed | FlowState::Failed) {
            return Err(EtlError::Configuration(format!("flow already ran ({})", self.state)));
        }
        let result = self.execute();
        match &result {
            Ok(report) => {
                self.state = FlowState::Completed;
                info!(watermark = %report.watermark, rows_written = ?report.rows_written(), "Flow completed");
            }
            Err(e) => {
                self.state = FlowState::Failed;
                error!(error = %e, "Flow failed");
            }
        }
        result
    }

    fn pre_validate(&self) -> EtlResult<()> {
        if self.config.is_none() {
            return Err(EtlError::Configuration(
                "config is not set, add one with add_default_config or add_config_custom".into(),
            ));
        }
        if self.sources.is_empty() {
            return Err(EtlError::Configuration(
                "no sources have been added, add at least one with add_source_*".into(),
            ));
        }
        let mut aliases = HashSet::with_capacity(self.sources.len());
        for source in &self.sources {
            if !aliases.insert(source.alias.as_str()) {
                return Err(EtlError::Configuration(format!("duplicate source alias `{}`", source.alias)));
            }
        }
        if self.transforms.is_empty() && self.sources.len() > 1 {
            return Err(EtlError::Configuration(
                "multiple sources and no transforms, add a transform with add_transform_custom to combine them".into(),
            ));
        }
        if self.sink.is_none() {
            return Err(EtlError::Configuration("sink is not set, add one with add_sink_*".into()));
        }
        Ok(())
    }

    fn execute(&mut self) -> EtlResult<FlowReport> {
        self.pre_validate()?;
        self.state = FlowState::Validated;

        let (Some(config), Some(sink)) = (self.config.take(), self.sink.take()) else {
            return Err(EtlError::Configuration("flow is missing its config or sink".into()));
        };
        let sources = std::mem::take(&mut self.sources);
        let transforms = std::mem::take(&mut self.transforms);
        let post_transforms = std::mem::take(&mut self.post_transforms);
        self.state = FlowState::Running;
        info!(
            sources = sources.len(),
            transforms = transforms.len(),
            post_transforms = post_transforms.len(),
            sink = %sink.target,
            "Running flow"
        );

        let watermark = (sink.watermark)(&config)?;
        info!(%watermark, column = %config.incremental_column.name, "Read watermark");

        let mut frames = BTreeMap::new();
        for source in sources {
            let frame = (source.read)()?;
            let frame = if source.incremental {
                filter_incremental(&source.alias, frame, &config, &watermark)?
            } else {
                frame
            };
            frames.insert(source.alias, frame);
        }

        let mut input = TransformInput::Sources(frames);
        for transform in transforms {
            input = TransformInput::Frame(transform(input, &config)?);
        }
        let mut frame = input.into_frame()?;

        for post in post_transforms {
            debug!(post_transform = post.name, "Applying post-transform");
            frame = (post.apply)(frame, &config)?;
        }

        post_validate(&frame.schema(), &config)?;
        let outcome = (sink.write)(frame, &config)?;
        Ok(FlowReport { watermark, outcome })
    }
}

fn table_watermark(table_uri: String) -> WatermarkFn {
    Box::new(move |config: &Config| get_incremental_column_value(&table_uri, &config.incremental_column.name))
}

#[cfg(feature = "parquet")]
fn read_parquet(glob_uri: &str) -> EtlResult<Frame> {
    crate::sources::source_parquet(glob_uri)
}

#[cfg(not(feature = "parquet"))]
fn read_parquet(glob_uri: &str) -> EtlResult<Frame> {
    Err(EtlError::Configuration(format!(
        "cannot read `{}`: built without the `parquet` feature",
        glob_uri
    )))
}

/// Keep rows newer than the watermark, evaluated now.
fn filter_incremental(alias: &str, frame: Frame, config: &Config, watermark: &Watermark) -> EtlResult<Frame> {
    let column = &config.incremental_column.name;
    if !frame.schema().contains(column) {
        return Err(SchemaError::MissingIncrementalColumn(column.clone()).into());
    }
    let filtered = frame.filter(watermark.predicate(column))?.collect()?;
    debug!(source = %alias, rows = filtered.height(), "Filtered incremental source");
    Ok(Frame::Eager(filtered))
}

/// Final frame checks, run before the sink sees anything.
fn post_validate(schema: &Schema, config: &Config) -> EtlResult<()> {
    let incremental = &config.incremental_column.name;
    if !schema.contains(incremental) {
        return Err(SchemaError::MissingIncrementalColumn(incremental.clone()).into());
    }
    let missing: Vec<String> = config
        .audit_column_names()
        .into_iter()
        .filter(|name| !schema.contains(name))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingAuditColumns(missing).into());
    }
    if let Some(name) = schema.names().into_iter().find(|name| !COLUMN_NAME.is_match(name)) {
        return Err(SchemaError::InvalidColumnName(name.to_string()).into());
    }
    Ok(())
}

// =============================================================================
// Presets
// =============================================================================

/// Default config with the default post-transforms. Sources and a sink still
/// need to be added.
pub fn get_default_flow() -> Flow {
    Flow::new().add_default_config().add_default_post_transforms()
}

/// Where a landing-to-raw flow reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    Delta,
    #[default]
    Parquet,
    Csv,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Delta => "delta",
            SourceType::Parquet => "parquet",
            SourceType::Csv => "csv",
        };
        f.write_str(name)
    }
}

impl FromStr for SourceType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delta" => Ok(SourceType::Delta),
            "parquet" => Ok(SourceType::Parquet),
            "csv" => Ok(SourceType::Csv),
            other => Err(EtlError::Configuration(format!(
                "invalid source type `{}`, expected one of: delta, parquet, csv",
                other
            ))),
        }
    }
}

/// How a landing-to-raw flow loads its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadType {
    #[default]
    ScdType1,
    ScdType2,
}

impl fmt::Display for LoadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadType::ScdType1 => f.write_str("scd_type_1"),
            LoadType::ScdType2 => f.write_str("scd_type_2"),
        }
    }
}

impl FromStr for LoadType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scd_type_1" | "scd1" => Ok(LoadType::ScdType1),
            "scd_type_2" | "scd2" => Ok(LoadType::ScdType2),
            other => Err(EtlError::Configuration(format!(
                "invalid target load type `{}`, expected one of: scd_type_1, scd_type_2",
                other
            ))),
        }
    }
}

/// Options of [`get_default_landing_to_raw_flow`].
#[derive(Debug, Clone, PartialEq)]
pub struct LandingToRawOptions {
    pub config: Config,
    pub source_type: SourceType,
    pub source_is_incremental: bool,
    pub load_type: LoadType,
    /// Source column names; normalized the same way as the data for the sink.
    pub primary_key_columns: Vec<String>,
    /// Defaults to the configured incremental column.
    pub deduplication_order_columns: Option<Vec<String>>,
    pub deduplication_order_descending: bool,
}

impl Default for LandingToRawOptions {
    fn default() -> Self {
        Self {
            config: get_default_config(),
            source_type: SourceType::default(),
            source_is_incremental: true,
            load_type: LoadType::default(),
            primary_key_columns: Vec::new(),
            deduplication_order_columns: None,
            deduplication_order_descending: true,
        }
    }
}

/// Load files or a table from a landing area into a raw table.
///
/// The flow deduplicates on the primary key (latest incremental value
/// first), normalizes column names, stamps audit columns and upserts into
/// `target_table_uri`. File sources read every matching file below
/// `source_base_uri`.
pub fn get_default_landing_to_raw_flow(
    source_base_uri: &str,
    target_table_uri: &str,
    options: LandingToRawOptions,
) -> EtlResult<Flow> {
    if options.primary_key_columns.is_empty() {
        return Err(EtlError::Configuration(format!(
            "primary key columns must be set for load type `{}`",
            options.load_type
        )));
    }
    let config = options.config;
    let order_columns = options
        .deduplication_order_columns
        .unwrap_or_else(|| vec![config.incremental_column.name.clone()]);
    let target_keys: Vec<String> = options
        .primary_key_columns
        .iter()
        .map(|c| config.normalize_column_name(c))
        .collect();
    let alias = options.source_type.to_string();

    let flow = Flow::new()
        .add_config_custom(config)
        .add_post_transform_deduplicate(
            &options.primary_key_columns,
            &order_columns,
            options.deduplication_order_descending,
        )
        .add_post_transform_normalize_column_names()
        .add_post_transform_audit_columns();

    let base = source_base_uri.trim_end_matches('/');
    let incremental = options.source_is_incremental;
    let flow = match options.source_type {
        SourceType::Delta => flow.add_source_delta_table(source_base_uri, &alias, incremental),
        SourceType::Parquet => flow.add_source_parquet(&format!("{}/**/*.parquet", base), &alias, incremental),
        SourceType::Csv => flow.add_source_csv(&format!("{}/**/*.csv", base), &alias, incremental),
    };

    Ok(match options.load_type {
        LoadType::ScdType1 => flow.add_sink_upsert_scd_type_1(target_table_uri, &target_keys, NO_EXCEPT),
        LoadType::ScdType2 => flow.add_sink_upsert_scd_type_2(target_table_uri, &target_keys),
    })
}
