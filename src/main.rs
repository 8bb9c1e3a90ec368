//! CLI entry point for the IVF vector index.
//!
//! Provides commands for building an index from a vector file, querying it,
//! and warming the page cache.

use anyhow::{Context, Result, anyhow, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use ivfdb::{
    DataRecord, IndexCatalog, IndexInfo, IvfError, IvfIndex, LocalStorage, Neighbor,
    RecordPointer, Settings, Vector,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Level;

const DEFAULT_TABLE: &str = "vectors";
const DEFAULT_FIELD: &str = "embedding";

#[derive(Debug, Serialize)]
struct SearchOutput<'a> {
    index: &'a str,
    mode: &'static str,
    results: &'a [Neighbor],
}

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Hierarchical IVF vector index
#[derive(Parser)]
#[command(
    name = "ivfdb",
    version = env!("CARGO_PKG_VERSION"),
    about = "Hierarchical IVF vector index",
    long_about = "Cluster vectors into a two-level inverted file and answer approximate nearest-neighbor queries.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .ivfdb directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .ivfdb/settings.toml")]
    Config,

    /// Build an index from a vector file
    #[command(
        about = "Train and materialize an index from a vector file",
        after_help = "Input format: one vector per line, components separated by whitespace or commas.\nThe line ordinal becomes the row back-pointer. Lines starting with '#' are ignored."
    )]
    Build {
        /// File with one vector per line
        input: PathBuf,

        /// Base table the index covers
        #[arg(long, default_value = DEFAULT_TABLE)]
        table: String,

        /// Vector column of the base table
        #[arg(long, default_value = DEFAULT_FIELD)]
        field: String,
    },

    /// Query the nearest rows of a vector
    #[command(
        about = "Approximate nearest-neighbor search",
        after_help = "Examples:\n  ivfdb search 0.1 0.2 0.3 0.4 --k 5\n  ivfdb search 0.1 0.2 0.3 0.4 --flat 20 --json"
    )]
    Search {
        /// Query vector components
        #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
        values: Vec<f32>,

        /// Number of results
        #[arg(short, long, default_value_t = 10)]
        k: usize,

        /// Probe the M nearest leaves across all partitions instead
        #[arg(long, value_name = "M")]
        flat: Option<usize>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        #[arg(long, default_value = DEFAULT_TABLE)]
        table: String,

        #[arg(long, default_value = DEFAULT_FIELD)]
        field: String,
    },

    /// Pin centroid tables into the page cache
    #[command(about = "Warm the page cache with every centroid table")]
    Preload {
        #[arg(long, default_value = DEFAULT_TABLE)]
        table: String,

        #[arg(long, default_value = DEFAULT_FIELD)]
        field: String,
    },

    /// Show catalog contents
    #[command(about = "List indexes with their layout and estimated search cost")]
    Stats,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        if let Some(ivf) = e.downcast_ref::<IvfError>() {
            for suggestion in ivf.recovery_suggestions() {
                eprintln!("  - {suggestion}");
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow!("Configuration error loading from {}: {e}", path.display()))?,
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        }),
    };

    let level = if cli.verbose || settings.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force).map_err(|e| anyhow!("{e}"))?;
            println!("Edit {} to customize your settings.", path.display());
            Ok(())
        }
        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Build {
            input,
            table,
            field,
        } => build(&settings, &input, &table, &field),
        Commands::Search {
            values,
            k,
            flat,
            json,
            table,
            field,
        } => search(&settings, values, k, flat, json, &table, &field),
        Commands::Preload { table, field } => preload(&settings, &table, &field),
        Commands::Stats => stats(&settings),
    }
}

fn open_storage(settings: &Settings) -> Result<(LocalStorage, IndexCatalog)> {
    let data_dir = settings.resolved_data_dir();
    let storage = LocalStorage::open(
        &data_dir,
        settings.storage.block_size,
        settings.storage.cache_pages,
    )
    .with_context(|| format!("cannot open data directory {}", data_dir.display()))?;
    let catalog = IndexCatalog::open(&data_dir)?;
    Ok((storage, catalog))
}

fn read_vectors(path: &Path, dimension: usize) -> Result<Vec<DataRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::parse::<f32>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}:{}: invalid number", path.display(), line_no + 1))?;
        if values.len() != dimension {
            bail!(
                "{}:{}: expected {dimension} components, found {}",
                path.display(),
                line_no + 1,
                values.len()
            );
        }
        let ordinal = records.len() as u64;
        records.push(DataRecord::new(
            Vector::new(values),
            RecordPointer::new(ordinal, 0),
        ));
    }
    Ok(records)
}

fn build(settings: &Settings, input: &Path, table: &str, field: &str) -> Result<()> {
    let records = read_vectors(input, settings.index.dimension)?;
    let (storage, catalog) = open_storage(settings)?;
    let tx = storage.begin_bulk();

    let info = IndexInfo::new(
        &format!("{table}_{field}_ivf"),
        table,
        field,
        settings.index.clone(),
    );

    // The index already on this column keeps serving until the new one is in
    let start = Instant::now();
    let count = records.len();
    let index = catalog.replace_index(info, records, &tx)?;

    println!(
        "Built index '{}' over {count} vectors in {:.2?}",
        index.name(),
        start.elapsed()
    );
    if let Some(directory) = index.directory() {
        println!(
            "  partitions: {}, populated leaves: {}, generation: {}",
            directory.level2.len(),
            directory.populated_leaves(),
            directory.generation
        );
    }
    Ok(())
}

fn search(
    settings: &Settings,
    values: Vec<f32>,
    k: usize,
    flat: Option<usize>,
    json: bool,
    table: &str,
    field: &str,
) -> Result<()> {
    let (storage, catalog) = open_storage(settings)?;
    let index: Arc<IvfIndex> = catalog.index(table, field)?;
    let tx = storage.begin();
    let query = Vector::new(values);

    let start = Instant::now();
    let (mode, results) = match flat {
        Some(width) => ("flat", index.flat_search(&query, Some(width), &tx)?),
        None => ("scan", index.search(&query, k, &tx)?),
    };
    let elapsed = start.elapsed();

    if json {
        let output = SearchOutput {
            index: index.name(),
            mode,
            results: &results,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
    }
    for (rank, hit) in results.iter().enumerate() {
        println!(
            "{:>3}. {:<14} leaf {:<8} distance {:.6}",
            rank + 1,
            hit.payload.to_string(),
            hit.leaf.to_string(),
            hit.distance
        );
    }
    eprintln!("{} results in {elapsed:.2?}", results.len());
    Ok(())
}

fn preload(settings: &Settings, table: &str, field: &str) -> Result<()> {
    let (storage, catalog) = open_storage(settings)?;
    let tx = storage.begin();
    let report = catalog.preload(table, field, &tx)?;
    println!(
        "Pinned {} blocks across {} centroid tables",
        report.blocks_pinned, report.tables
    );
    if !report.is_complete() {
        println!(
            "  {} blocks left to demand paging (storage.cache_pages = {})",
            report.blocks_skipped, settings.storage.cache_pages
        );
    }
    Ok(())
}

fn stats(settings: &Settings) -> Result<()> {
    let (_storage, catalog) = open_storage(settings)?;
    let indexes = catalog.indexes();
    if indexes.is_empty() {
        println!("No indexes in {}", catalog.path().display());
        return Ok(());
    }

    for index in indexes {
        let info = index.info();
        println!("{} on {}.{}", info.name, info.table, info.field);
        println!(
            "  dimension: {}, level1: {}, level2: {}, probe width: {}",
            info.config.dimension,
            info.config.level1_clusters,
            info.config.level2_clusters,
            info.config.probe_width
        );
        match index.directory() {
            Some(directory) => {
                println!(
                    "  generation {}: {} records, {} partitions, {} populated leaves",
                    directory.generation,
                    directory.record_count,
                    directory.level2.len(),
                    directory.populated_leaves()
                );
                println!("  estimated rows per query: {:.1}", index.search_cost());
            }
            None => println!("  not built"),
        }
    }
    Ok(())
}
