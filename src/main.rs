//! tracestate CLI
//!
//! Command-line interface for trace indexing:
//! - Generate synthetic event files
//! - Build (or reuse) checkpoint indexes
//! - Seek by time or rank
//! - Inspect persisted index files

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracestate::config::{generate_default_config, Config, LoggingConfig};
use tracestate::index::{
    header, IndexBackend, IndexHeader, BTREE_FILE, BTREE_RANK_FILE, FLAT_ARRAY_FILE,
};
use tracestate::trace::{CheckpointIndexer, EventFileTrace, SyntheticTrace, TraceSource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tracestate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Checkpoint indexing for large event traces")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a synthetic event file
    Generate {
        /// Output path
        path: PathBuf,
        /// Number of events
        #[arg(short, long, default_value = "10000")]
        events: u64,
        /// Timestamp of the first event
        #[arg(long, default_value = "0")]
        start: i64,
        /// Nanoseconds between events
        #[arg(long, default_value = "1000")]
        step: i64,
        /// Shift timestamps by up to this much, making them non-monotonic
        #[arg(long)]
        jitter: Option<i64>,
        /// Jitter seed
        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Build the checkpoint index of a trace, or reuse a complete one
    Index {
        /// Event file
        path: PathBuf,
        /// Backend (memory, flat_array, btree)
        #[arg(short, long)]
        backend: Option<IndexBackend>,
        /// Events between checkpoints
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Locate an event by timestamp or rank
    #[command(group(ArgGroup::new("target").required(true).args(["time", "rank"])))]
    Seek {
        /// Event file
        path: PathBuf,
        /// First event at or after this timestamp
        #[arg(short, long)]
        time: Option<i64>,
        /// Event of this rank
        #[arg(short, long)]
        rank: Option<u64>,
        /// Backend (memory, flat_array, btree)
        #[arg(short, long)]
        backend: Option<IndexBackend>,
    },

    /// Show the headers of a trace's persisted index files
    Inspect {
        /// Event file
        path: PathBuf,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Generate {
            path,
            events,
            start,
            step,
            jitter,
            seed,
        } => {
            let mut trace = SyntheticTrace::new("generated", events, start, step);
            if let Some(amplitude) = jitter {
                trace = trace.with_jitter(seed, amplitude);
            }
            let written = EventFileTrace::write(
                &path,
                trace.timestamps().iter().enumerate().map(|(i, &ts)| (ts, i as u64)),
            )?;
            println!("Wrote {} events to {:?}", written, path);
        }

        Commands::Index {
            path,
            backend,
            interval,
        } => {
            let mut config = config;
            apply_index_args(&mut config, backend, interval);

            let mut trace = EventFileTrace::open(&path)?;
            let mut indexer = CheckpointIndexer::open(&trace, &config.indexer)?;
            let stats = indexer.build_index(&mut trace)?;
            indexer.dispose()?;

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
                _ => {
                    println!("Backend:      {}", stats.backend);
                    println!("Checkpoints:  {}", stats.size);
                    println!("Events:       {}", stats.nb_events);
                    println!("Time range:   {}", stats.time_range);
                    println!("Complete:     {}", stats.complete);
                    println!("Rebuilt:      {}", stats.created_from_scratch);
                    println!(
                        "Directory:    {:?}",
                        config.indexer.trace_dir(trace.name())
                    );
                }
            }
        }

        Commands::Seek {
            path,
            time,
            rank,
            backend,
        } => {
            let mut config = config;
            apply_index_args(&mut config, backend, None);

            let mut trace = EventFileTrace::open(&path)?;
            let mut indexer = CheckpointIndexer::open(&trace, &config.indexer)?;
            indexer.build_index(&mut trace)?;

            let found = match (time, rank) {
                (Some(time), _) => indexer.locate_event_by_time(&mut trace, time)?,
                (None, Some(rank)) => indexer.locate_event_by_rank(&mut trace, rank)?,
                (None, None) => bail!("either --time or --rank is required"),
            };
            indexer.dispose()?;

            let Some((context, event)) = found else {
                println!("No matching event");
                return Ok(());
            };
            let result = SeekOutput {
                rank: context.rank,
                offset: context.location,
                timestamp: event.timestamp,
                payload: event.payload,
            };
            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&result)?),
                _ => println!(
                    "Event {} at offset {}: timestamp={} payload={}",
                    result.rank, result.offset, result.timestamp, result.payload
                ),
            }
        }

        Commands::Inspect { path } => {
            let trace = EventFileTrace::open(&path)?;
            let dir = config.indexer.trace_dir(trace.name());
            let files = inspect_dir(&dir);

            if files.is_empty() {
                println!("No index files in {:?}", dir);
                return Ok(());
            }
            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&files)?),
                _ => print_table(&files),
            }
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Wrote default config to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tracestate={}", logging.level).into());

    let json = match logging.format.as_str() {
        "json" => true,
        "pretty" => false,
        other => bail!("Unknown log format: {}", other),
    };

    match (&logging.file, json) {
        (Some(file), json) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .with_context(|| format!("Failed to open log file {}", file))?;
            let writer = std::sync::Mutex::new(file);
            if json {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                    .init();
            }
        }
        (None, true) => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (None, false) => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

fn apply_index_args(
    config: &mut Config,
    backend: Option<IndexBackend>,
    interval: Option<u64>,
) {
    if let Some(backend) = backend {
        config.indexer.backend = backend;
    }
    if let Some(interval) = interval {
        config.indexer.checkpoint_interval = interval;
    }
}

#[derive(Serialize)]
struct SeekOutput {
    rank: u64,
    offset: u64,
    timestamp: i64,
    payload: u64,
}

#[derive(Serialize)]
struct IndexFileInfo {
    file: String,
    size: u64,
    nb_events: u64,
    start: i64,
    end: i64,
    complete: bool,
    trace_bytes: u64,
    trace_modified: String,
}

impl IndexFileInfo {
    fn new(file: &str, header: &IndexHeader) -> Self {
        let modified = header.signature.modified;
        let trace_modified = chrono::DateTime::from_timestamp(
            modified.div_euclid(1_000_000_000),
            modified.rem_euclid(1_000_000_000) as u32,
        )
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| modified.to_string());

        Self {
            file: file.to_string(),
            size: header.size,
            nb_events: header.nb_events,
            start: header.time_range.start,
            end: header.time_range.end,
            complete: header.complete,
            trace_bytes: header.signature.byte_size,
            trace_modified,
        }
    }
}

fn inspect_dir(dir: &Path) -> Vec<IndexFileInfo> {
    [FLAT_ARRAY_FILE, BTREE_FILE, BTREE_RANK_FILE]
        .into_iter()
        .filter_map(|name| {
            let path = dir.join(name);
            if !path.exists() {
                return None;
            }
            match header::read_header(&path) {
                Ok(header) => Some(IndexFileInfo::new(name, &header)),
                Err(e) => {
                    eprintln!("{}: unreadable ({})", name, e);
                    None
                }
            }
        })
        .collect()
}

fn print_table(files: &[IndexFileInfo]) {
    println!(
        "{:<32} {:>8} {:>10} {:>14} {:>14} {:<8} {}",
        "File", "Size", "Events", "Start", "End", "Complete", "Trace modified"
    );
    println!("{}", "-".repeat(110));
    for info in files {
        println!(
            "{:<32} {:>8} {:>10} {:>14} {:>14} {:<8} {}",
            info.file,
            info.size,
            info.nb_events,
            info.start,
            info.end,
            info.complete,
            info.trace_modified
        );
    }
}
