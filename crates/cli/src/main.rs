mod logging;
mod session;

use anatomist::{census, CensusConfig};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use common::{HeapAddress, HeapError, MappedImage};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "heapwatch")]
#[command(version, about = "Task states and GC root paths from a captured heap image", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every task object with its decoded lifecycle state.
    Tasks {
        /// Heap image to inspect.
        image: PathBuf,
        #[command(flatten)]
        census: CensusArgs,
        /// Emit one JSON object per task instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print every GC root path that keeps an object alive.
    Roots {
        /// Heap image to inspect.
        image: PathBuf,
        /// Object address (decimal, or hex with a `0x` prefix).
        address: HeapAddress,
        /// Search roots on all cores.
        #[arg(long)]
        parallel: bool,
    },
    /// List tasks, then explore root paths for addresses read from stdin.
    Inspect {
        /// Heap image to inspect.
        image: PathBuf,
        #[command(flatten)]
        census: CensusArgs,
        /// Search roots on all cores.
        #[arg(long)]
        parallel: bool,
    },
}

#[derive(Args)]
struct CensusArgs {
    /// Declared-type prefix identifying task objects.
    #[arg(long, env = "HEAPWATCH_TASK_PREFIX", default_value = census::DEFAULT_TASK_PREFIX)]
    prefix: String,
    /// Name of the packed state field on task objects.
    #[arg(long, env = "HEAPWATCH_FLAGS_FIELD", default_value = census::DEFAULT_FLAGS_FIELD)]
    field: String,
}

impl From<CensusArgs> for CensusConfig {
    fn from(args: CensusArgs) -> Self {
        CensusConfig {
            type_prefix: args.prefix,
            flags_field: args.field,
        }
    }
}

fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: .env: {}", e);
        }
    }
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tasks {
            image,
            census,
            json,
        } => cmd_tasks(&image, census.into(), json),
        Commands::Roots {
            image,
            address,
            parallel,
        } => cmd_roots(&image, address, parallel),
        Commands::Inspect {
            image,
            census,
            parallel,
        } => cmd_inspect(&image, census.into(), parallel),
    }
}

// ---------------------------------------------------------------------------
// image
// ---------------------------------------------------------------------------

/// Opens the image or aborts the session before any analysis.
fn open_image(path: &Path) -> anyhow::Result<MappedImage> {
    MappedImage::open(path).map_err(|e| match e {
        HeapError::ImageUnavailable { .. } => anyhow::Error::new(e)
            .context("Please provide the path to a readable memory image"),
        other => anyhow::Error::new(other).context(format!("Cannot load {}", path.display())),
    })
}

// ---------------------------------------------------------------------------
// tasks
// ---------------------------------------------------------------------------

fn cmd_tasks(image_path: &Path, config: CensusConfig, json: bool) -> anyhow::Result<()> {
    let image = open_image(image_path)?;
    let report = census::scan(&image, &config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    session::print_tasks(&mut out, &report, json)?;
    if !json {
        writeln!(out)?;
        session::print_summary(&mut out, &report)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// roots
// ---------------------------------------------------------------------------

fn cmd_roots(image_path: &Path, address: HeapAddress, parallel: bool) -> anyhow::Result<()> {
    let image = open_image(image_path)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    session::print_roots(&mut out, &image, address, parallel)
        .with_context(|| format!("Failed to write root paths for {}", address))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

fn cmd_inspect(image_path: &Path, config: CensusConfig, parallel: bool) -> anyhow::Result<()> {
    let image = open_image(image_path)?;
    let report = census::scan(&image, &config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    session::print_tasks(&mut out, &report, false)?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let explored = session::explore(&image, &report, &mut input, &mut out, parallel)?;
    tracing::info!(explored, "inspection session ended");
    Ok(())
}
