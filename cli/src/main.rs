//! Generate an F1 table from the command line.

use clap::Parser;
use plotx::{
    Config, DiskQueue, Error, F1Builder, F1Generator, F1Report, FileQueue, MemoryQueue,
    BUCKET_COUNT, DEFAULT_BUDGET,
};
use sha3::{Digest, Sha3_256};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "plotx", version, about = "Generate a bucketized F1 table")]
struct Args {
    /// JSON file with generation settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Table size exponent
    #[arg(short, long)]
    k: Option<u32>,

    /// Worker thread count
    #[arg(short, long)]
    threads: Option<usize>,

    /// Chunk buffer size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Storage block size in bytes
    #[arg(long, default_value_t = 4096)]
    block_size: usize,

    /// Bytes of chunk buffer the writer may have in flight
    #[arg(long, default_value_t = DEFAULT_BUDGET)]
    budget: usize,

    /// Seed phrase, hashed with SHA3-256 into the plot id
    #[arg(long, default_value = "plotx")]
    seed: String,

    /// Directory for bucket stream files
    #[arg(short, long, default_value = "plotx-out")]
    out: PathBuf,

    /// Keep the whole table in memory instead of writing bucket files
    #[arg(long, conflicts_with = "dry_run")]
    mem: bool,

    /// Run the chunked driver but keep writes in memory
    #[arg(long)]
    dry_run: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

impl Args {
    /// Settings from the config file, if any, with flags applied on top.
    fn config(&self) -> Result<Config, Error> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text).map_err(|e| Error::Config(e.to_string()))?
            }
            None => Config::default(),
        };
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        Ok(config)
    }
}

/// Hash a seed phrase into a plot id.
fn plot_id(seed: &str) -> [u8; 32] {
    let mut id = [0u8; 32];
    id.copy_from_slice(&Sha3_256::digest(seed.as_bytes()));
    id
}

/// Log how evenly entries were spread over buckets.
fn log_counts(counts: impl Iterator<Item = u64>) {
    let counts: Vec<u64> = counts.collect();
    let total: u64 = counts.iter().sum();
    let min = counts.iter().copied().min().unwrap_or(0);
    let max = counts.iter().copied().max().unwrap_or(0);
    info!(total, min, max, buckets = BUCKET_COUNT, "bucket sizes");
}

/// Generate to a disk queue and log the result.
fn run_disk<Q: DiskQueue>(generator: &F1Generator, queue: &Q) -> Result<F1Report, Error> {
    let report = generator.generate_disk(queue)?;
    info!(
        chunks = report.chunks,
        direct_bytes = report.direct_bytes,
        remainder_bytes = report.remainder_bytes,
        "disk generation finished"
    );
    log_counts(report.bucket_counts.iter().copied());
    Ok(report)
}

/// Run the command described by `args`.
fn run(args: &Args) -> Result<(), Error> {
    let config = args.config()?;
    let generator = F1Builder::from_config(config).build_from_plot_id(&plot_id(&args.seed))?;
    info!(?generator, seed = %args.seed, "starting");

    if args.mem {
        let buckets = generator.generate_mem()?;
        log_counts(buckets.counts().iter().map(|&c| u64::from(c)));
    } else if args.dry_run {
        let queue = MemoryQueue::new(args.block_size);
        let _ = run_disk(&generator, &queue)?;
        info!(writes = queue.submissions().len(), "dry run recorded writes");
    } else {
        let queue = FileQueue::create(&args.out, args.block_size, args.budget)?;
        let _ = run_disk(&generator, &queue)?;
        queue.finish()?;
        info!(dir = %args.out.display(), "bucket files written");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "generation failed");
            ExitCode::FAILURE
        }
    }
}
