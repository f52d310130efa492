use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "blobpath",
    about = "Byte-range reads and writes over a fixed-size object store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file with `[data_path]` and `[volume]` tables
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a file into a blob at an offset
    Put(PutArgs),
    /// Read a byte range of a blob
    Get(GetArgs),
    /// Show a blob's length and metadata
    Stat(StatArgs),
    /// Run random writes and reads and check them against a shadow copy
    Bench(BenchArgs),
}

/// Content written into the blob before the command runs. The store lives
/// only as long as the process, so this is how `get` and `stat` see data.
#[derive(Args)]
pub struct Preload {
    /// File written at `--load-offset` before the command runs
    #[arg(long)]
    pub load: Option<PathBuf>,

    #[arg(long, default_value = "0")]
    pub load_offset: u64,
}

#[derive(Args)]
pub struct PutArgs {
    #[arg(long)]
    pub blob: String,

    #[arg(long, default_value = "0")]
    pub offset: u64,

    #[arg(short, long)]
    pub input: PathBuf,

    /// Metadata entries as `key=value`
    #[arg(long = "meta")]
    pub metadata: Vec<String>,
}

#[derive(Args)]
pub struct GetArgs {
    #[arg(long)]
    pub blob: String,

    #[arg(long, default_value = "0")]
    pub offset: u64,

    #[arg(short = 'n', long)]
    pub length: u32,

    /// Print bytes as hex instead of text
    #[arg(long)]
    pub hex: bool,

    #[command(flatten)]
    pub preload: Preload,
}

#[derive(Args)]
pub struct StatArgs {
    #[arg(long)]
    pub blob: String,

    #[command(flatten)]
    pub preload: Preload,
}

#[derive(Args)]
pub struct BenchArgs {
    #[arg(long, default_value = "1000")]
    pub ops: u32,

    /// Largest single write or read, in bytes
    #[arg(long, default_value = "65536")]
    pub max_len: u32,

    /// Fraction of operations that are writes
    #[arg(long, default_value = "0.5")]
    pub write_ratio: f64,

    /// RNG seed; random if omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of concurrent workers, each on its own blob
    #[arg(long, default_value = "4")]
    pub workers: u32,
}
