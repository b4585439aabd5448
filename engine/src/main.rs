//! Lakeflow CLI - incremental loads into versioned tables
//!
//! # Main Commands
//!
//! ```bash
//! lakeflow run landing/customers raw/customers -k CustomerID   # Landing-to-raw load
//! lakeflow history raw/customers                               # Commit log of a table
//! lakeflow show raw/customers --version 3 --limit 20           # Rows of a table version
//! ```
//!
//! # Helper Commands
//!
//! ```bash
//! lakeflow normalize "Profit&Loss" CustomerID    # Show normalized column names
//! lakeflow config                                # Print the effective configuration
//! ```
//!
//! Logging goes to stderr and is configured with `LAKEFLOW_LOG_LEVEL`,
//! `LAKEFLOW_LOG_FORMAT` and `LAKEFLOW_LOG_FILTER` (a `.env` file is read).

use clap::{Parser, Subcommand};
use lakeflow::logging::{init_logging, LogConfig};
use lakeflow::storage::codec::write_rows;
use lakeflow::{get_default_config, get_default_landing_to_raw_flow, Config, DeltaTable, LandingToRawOptions, LoadType, SourceType};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "lakeflow")]
#[command(about = "Incremental ETL into versioned tables", long_about = None)]
struct Cli {
    /// Configuration JSON file (default configuration if not specified)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load landing data into a raw table
    Run {
        /// Source table, or base directory of source files
        source: String,

        /// Target table
        target: String,

        /// Source type: delta, parquet or csv
        #[arg(short, long, default_value = "parquet")]
        source_type: SourceType,

        /// Target load type: scd_type_1 or scd_type_2
        #[arg(short, long, default_value = "scd_type_1")]
        load_type: LoadType,

        /// Primary key column (repeat or comma-separate)
        #[arg(short = 'k', long = "primary-key", value_delimiter = ',', required = true)]
        primary_keys: Vec<String>,

        /// Deduplication order column (default: the incremental column)
        #[arg(short, long = "order-by", value_delimiter = ',')]
        order_by: Vec<String>,

        /// Keep the lowest order value instead of the highest
        #[arg(long)]
        ascending: bool,

        /// Read every source row instead of only rows past the watermark
        #[arg(long)]
        full: bool,
    },

    /// Show the commit log of a table, newest first
    History {
        /// Table path or file:// URI
        table: String,

        /// Maximum number of commits
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print rows of a table as JSON lines
    Show {
        /// Table path or file:// URI
        table: String,

        /// Table version (default: latest)
        #[arg(long)]
        version: Option<i64>,

        /// Maximum number of rows
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Normalize column names with the configured strategy
    Normalize {
        /// Column names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match LogConfig::from_env() {
        Ok(log_config) => {
            let log_config = if cli.verbose { log_config.verbose() } else { log_config };
            if let Err(e) = init_logging(&log_config) {
                eprintln!("⚠️  Logging disabled: {}", e);
            }
        }
        Err(e) => eprintln!("⚠️  Logging disabled: {}", e),
    }

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Run {
            source,
            target,
            source_type,
            load_type,
            primary_keys,
            order_by,
            ascending,
            full,
        } => {
            let options = LandingToRawOptions {
                config,
                source_type,
                source_is_incremental: !full,
                load_type,
                primary_key_columns: primary_keys,
                deduplication_order_columns: (!order_by.is_empty()).then_some(order_by),
                deduplication_order_descending: !ascending,
            };
            cmd_run(&source, &target, options)
        }

        Commands::History { table, limit } => cmd_history(&table, limit),

        Commands::Show { table, version, limit } => cmd_show(&table, version, limit),

        Commands::Normalize { names } => cmd_normalize(&config, &names),

        Commands::Config => cmd_config(&config),
    });

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(p) => Ok(Config::from_json_file(p)?),
        None => Ok(get_default_config()),
    }
}

fn cmd_run(source: &str, target: &str, options: LandingToRawOptions) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📥 Loading: {} → {}", source, target);
    eprintln!("   Source type: {}", options.source_type);
    eprintln!("   Load type: {}", options.load_type);
    eprintln!("   Primary key: {}", options.primary_key_columns.join(", "));

    let report = get_default_landing_to_raw_flow(source, target, options)?.run()?;

    eprintln!("   Watermark: {}", report.watermark);
    if let Some(outcome) = report.outcome {
        let m = outcome.metrics;
        eprintln!(
            "   Rows: {} inserted, {} updated, {} unchanged",
            m.inserted, m.updated, m.unchanged
        );
        if outcome.committed {
            eprintln!("✅ Committed version {}", outcome.version);
        } else {
            eprintln!("✅ No changes (table stays at version {})", outcome.version);
        }
    }
    Ok(())
}

fn cmd_history(table: &str, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let history = DeltaTable::open(table)?.history()?;
    let shown = limit.unwrap_or(history.len());
    eprintln!("📜 {} ({} versions)", table, history.len());

    let json = serde_json::to_string_pretty(&history[..shown.min(history.len())])?;
    println!("{}", json);
    Ok(())
}

fn cmd_show(table: &str, version: Option<i64>, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let table = match version {
        Some(v) => DeltaTable::open_at_version(table, v)?,
        None => DeltaTable::open(table)?,
    };
    let df = table.to_data_frame()?;
    eprintln!(
        "📄 {}@v{}: {} rows, columns: {}",
        table.uri(),
        table.version(),
        df.height(),
        df.column_names().join(", ")
    );

    let rows: Vec<usize> = (0..df.height().min(limit)).collect();
    let mut stdout = std::io::stdout().lock();
    write_rows(&mut stdout, &df.take(&rows))?;
    stdout.flush()?;
    Ok(())
}

fn cmd_normalize(config: &Config, names: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    for name in names {
        println!("{} → {}", name, config.normalize_column_name(name));
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config.to_json_pretty()?);
    Ok(())
}
