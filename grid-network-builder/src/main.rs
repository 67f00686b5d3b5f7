// grid-network-builder/src/main.rs
// Builds the grid adjacency network (nearest neighbours within a distance
// threshold) in batches, then creates the network table's indexes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use grid_network_builder::config::{BuilderOverrides, DatabaseOverrides, FileConfig};
use grid_network_builder::grid_import::load_grid_csv;
use grid_network_builder::{
    build_adjacency, create_network_indexes, BuilderConfig, DatabaseConfig, SqliteStore,
};

// ---------------------------------------------------------------------------
// CLI args
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "grid-network-builder", about = "Build the grid adjacency network", version)]
struct Args {
    /// SQLite database holding the grid and network tables
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// TOML file with [database] and [builder] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    grid_table: Option<String>,

    #[arg(long, global = true)]
    network_table: Option<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert edges for every source id from --start-id up to MAX(id)
    Build {
        /// First source id; set past the last committed batch to resume
        #[arg(long, allow_hyphen_values = true)]
        start_id: i64,
        #[arg(long)]
        batch_size: Option<u32>,
        #[arg(long)]
        distance_threshold: Option<f64>,
        #[arg(long)]
        max_neighbors: Option<u32>,
        /// Do not create the network indexes afterwards
        #[arg(long)]
        skip_indexes: bool,
    },
    /// Create the spatial, source and target indexes on the network table
    Index,
    /// Load grid cells from an `id,x,y` CSV (EPSG:3857 centroids)
    LoadGrid {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print grid and network row counts
    Stats,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(args)
}

/// Runs one subcommand. Every fatal condition comes back as `Err`, which
/// `main` turns into a non-zero exit status.
fn run(args: Args) -> Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let db = DatabaseConfig::resolve(&file, DatabaseOverrides {
        path: args.database,
        grid_table: args.grid_table,
        network_table: args.network_table,
    })?;

    match args.command {
        Command::Build {
            start_id,
            batch_size,
            distance_threshold,
            max_neighbors,
            skip_indexes,
        } => {
            let cfg = BuilderConfig::resolve(&file, start_id, BuilderOverrides {
                batch_size,
                distance_threshold,
                max_neighbors,
            })?;
            run_build(&db, &cfg)?;
            if !skip_indexes {
                run_indexes(&db)?;
            }
        }
        Command::Index => run_indexes(&db)?,
        Command::LoadGrid { csv } => {
            let mut store = open_store(&db)?;
            load_grid_csv(&mut store, &csv)?;
        }
        Command::Stats => {
            let counts = open_store(&db)?.row_counts()?;
            println!("{}: {}", db.grid_table, counts.grid_cells);
            println!("{}: {}", db.network_table, counts.edges);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn open_store(db: &DatabaseConfig) -> Result<SqliteStore> {
    SqliteStore::open(db).with_context(|| format!("Failed to open {}", db.path.display()))
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

// The store is dropped before returning so the index step gets its own connection.
fn run_build(db: &DatabaseConfig, cfg: &BuilderConfig) -> Result<()> {
    let mut store = open_store(db)?;
    let synced = store.sync_grid_index()?;
    debug!(synced, "grid search index synchronised");

    let report = build_adjacency(&mut store, cfg)?;
    drop(store);

    for failure in &report.failed_windows {
        warn!(window = %failure.window, error = %failure.error, "batch not committed");
    }
    info!(
        committed = report.windows_committed,
        failed = report.failed_windows.len(),
        edges = report.edges_inserted,
        "done"
    );
    Ok(())
}

fn run_indexes(db: &DatabaseConfig) -> Result<()> {
    info!("creating network indexes");
    let mut store = open_store(db)?;
    let report = create_network_indexes(&mut store);
    for outcome in report.failed() {
        warn!(index = %outcome.name, "index missing after this run");
    }
    if report.all_created() {
        info!("all indexes created");
    }
    Ok(())
}
