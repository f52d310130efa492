use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use blobpath_core::DataPath;
use blobpath_rpc::loopback;
use blobpath_store::InMemoryBackingStore;
use blobpath_types::{BlobDescriptor, BlobId};
use bytes::Bytes;
use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::info;

use crate::cli::*;
use crate::settings::Settings;

/// An in-process store served over the loopback channel, plus the data
/// path talking to it.
struct Session {
    store: Arc<InMemoryBackingStore>,
    path: DataPath,
    format: OutputFormat,
}

impl Session {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let settings = Settings::load(cli.config.as_deref())?;
        let volume = settings.volume.to_volume()?;
        let store = Arc::new(InMemoryBackingStore::new());
        let client = Arc::new(loopback::serve(store.clone(), settings.data_path.channel()));
        let path = DataPath::new(client, volume, settings.data_path)?;
        Ok(Self {
            store,
            path,
            format: cli.format,
        })
    }

    fn blob(&self, name: &str) -> anyhow::Result<BlobId> {
        Ok(BlobId::new(self.path.volume().id().clone(), name)?)
    }

    async fn preload(&self, blob: &BlobId, preload: &Preload) -> anyhow::Result<()> {
        if let Some(file) = &preload.load {
            let data = read_input(file)?;
            self.path.write(blob, preload.load_offset, data).await?;
            info!(%blob, offset = preload.load_offset, "preloaded");
        }
        Ok(())
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let session = Session::open(&cli)?;
    match cli.command {
        Command::Put(args) => cmd_put(&session, args).await,
        Command::Get(args) => cmd_get(&session, args).await,
        Command::Stat(args) => cmd_stat(&session, args).await,
        Command::Bench(args) => cmd_bench(&session, args).await,
    }
}

fn read_input(path: &Path) -> anyhow::Result<Bytes> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Bytes::from(data))
}

fn parse_metadata(entries: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("metadata must be key=value, got {entry:?}"),
        })
        .collect()
}

fn print_descriptor(format: OutputFormat, desc: &BlobDescriptor) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "blob": desc.blob.to_string(),
                "byte_count": desc.byte_count,
                "metadata": desc.metadata,
            })
        ),
        OutputFormat::Text => {
            println!("Blob {}", desc.blob.to_string().yellow().bold());
            println!("  Length: {} bytes", desc.byte_count.to_string().bold());
            for (key, value) in &desc.metadata {
                println!("  {}: {}", key.cyan(), value);
            }
        }
    }
}

async fn cmd_put(session: &Session, args: PutArgs) -> anyhow::Result<()> {
    let blob = session.blob(&args.blob)?;
    let metadata = parse_metadata(&args.metadata)?;
    let data = read_input(&args.input)?;
    let length = data.len();

    let started = Instant::now();
    session.path.write(&blob, args.offset, data).await?;
    session.path.flush(&blob).await?;
    for (key, value) in metadata {
        session.path.set_metadata(&blob, key, value).await?;
    }
    let elapsed = started.elapsed();

    let desc = session.path.stat(&blob).await?;
    if let OutputFormat::Text = session.format {
        println!(
            "{} Wrote {} bytes at offset {} in {:.2?}",
            "✓".green().bold(),
            length,
            args.offset,
            elapsed
        );
    }
    print_descriptor(session.format, &desc);
    Ok(())
}

async fn cmd_get(session: &Session, args: GetArgs) -> anyhow::Result<()> {
    let blob = session.blob(&args.blob)?;
    session.preload(&blob, &args.preload).await?;
    let data = session.path.read(&blob, args.offset, args.length).await?;

    match session.format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "blob": blob.to_string(),
                "offset": args.offset,
                "length": data.len(),
                "hex": hex::encode(&data),
            })
        ),
        OutputFormat::Text if args.hex => println!("{}", hex::encode(&data)),
        OutputFormat::Text => println!("{}", String::from_utf8_lossy(&data)),
    }
    Ok(())
}

async fn cmd_stat(session: &Session, args: StatArgs) -> anyhow::Result<()> {
    let blob = session.blob(&args.blob)?;
    session.preload(&blob, &args.preload).await?;
    let desc = session.path.stat(&blob).await?;
    print_descriptor(session.format, &desc);
    Ok(())
}

/// Outcome of one bench worker.
#[derive(Default)]
struct WorkerReport {
    writes: u64,
    reads: u64,
    bytes: u64,
    mismatches: u64,
}

async fn bench_worker(
    path: DataPath,
    blob: BlobId,
    ops: u32,
    max_len: u32,
    write_ratio: f64,
    seed: u64,
) -> anyhow::Result<WorkerReport> {
    let mut rng = StdRng::seed_from_u64(seed);
    let span = u64::from(max_len) * 8;
    let mut shadow = vec![0u8; (span + u64::from(max_len)) as usize];
    let mut written = 0u64;
    let mut report = WorkerReport::default();

    for _ in 0..ops {
        let offset = rng.gen_range(0..span);
        let len = rng.gen_range(1..=max_len);
        let range = offset as usize..offset as usize + len as usize;
        if written == 0 || rng.gen_bool(write_ratio) {
            let mut data = vec![0u8; len as usize];
            rng.fill(data.as_mut_slice());
            shadow[range].copy_from_slice(&data);
            path.write(&blob, offset, Bytes::from(data)).await?;
            written = written.max(offset + u64::from(len));
            report.writes += 1;
        } else {
            let got = path.read(&blob, offset, len).await?;
            if got.as_ref() != &shadow[range] {
                report.mismatches += 1;
            }
            report.reads += 1;
        }
        report.bytes += u64::from(len);
    }

    let desc = path.stat(&blob).await?;
    if desc.byte_count != written {
        report.mismatches += 1;
    }
    Ok(report)
}

async fn cmd_bench(session: &Session, args: BenchArgs) -> anyhow::Result<()> {
    if args.max_len == 0 || args.workers == 0 {
        bail!("--max-len and --workers must be at least 1");
    }
    if !(0.0..=1.0).contains(&args.write_ratio) {
        bail!("--write-ratio must be between 0 and 1");
    }
    let seed = args.seed.unwrap_or_else(rand::random);

    let started = Instant::now();
    let mut tasks = Vec::new();
    for worker in 0..args.workers {
        let blob = session.blob(&format!("bench-{worker}"))?;
        tasks.push(tokio::spawn(bench_worker(
            session.path.clone(),
            blob,
            args.ops,
            args.max_len,
            args.write_ratio,
            seed.wrapping_add(u64::from(worker)),
        )));
    }
    let mut total = WorkerReport::default();
    for task in tasks {
        let report = task.await??;
        total.writes += report.writes;
        total.reads += report.reads;
        total.bytes += report.bytes;
        total.mismatches += report.mismatches;
    }
    let elapsed = started.elapsed();
    let ops = total.writes + total.reads;
    let ops_per_sec = ops as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    let calls = session.store.calls();

    match session.format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "seed": seed,
                "workers": args.workers,
                "writes": total.writes,
                "reads": total.reads,
                "bytes": total.bytes,
                "mismatches": total.mismatches,
                "elapsed_ms": elapsed.as_millis() as u64,
                "ops_per_sec": ops_per_sec,
                "store_calls": {
                    "get_object": calls.get_object,
                    "update_object": calls.update_object,
                    "update_object_once": calls.update_object_once,
                    "transactions": calls.begin_transaction,
                },
            })
        ),
        OutputFormat::Text => {
            println!("Bench seed {} with {} workers", seed.to_string().cyan(), args.workers);
            println!(
                "  {} writes, {} reads, {} bytes in {:.2?} ({:.0} ops/s)",
                total.writes, total.reads, total.bytes, elapsed, ops_per_sec
            );
            println!(
                "  Store: {} fetches, {} single updates, {} transactions ({} staged updates)",
                calls.get_object,
                calls.update_object_once,
                calls.begin_transaction,
                calls.update_object
            );
            if total.mismatches == 0 {
                println!("{} All reads matched", "✓".green().bold());
            } else {
                println!("{} {} mismatches", "✗".red().bold(), total.mismatches);
            }
        }
    }
    if total.mismatches > 0 {
        bail!("{} mismatched reads", total.mismatches);
    }
    Ok(())
}
