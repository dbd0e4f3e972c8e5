use clap::{Parser, Subcommand};
use rpkstore::query::{QueryExecutor, QueryFilters, QueryRequest};
use rpkstore::reader::BlockReader;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rpk", version = "1.0.0", about = "Inspect rpkstore block files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header, footer, and statistics of one file
    Info {
        input: PathBuf,
    },
    /// List per-block metadata of one file
    Blocks {
        input: PathBuf,
    },
    /// Dump the events of one file in insertion order
    Events {
        input: PathBuf,
        /// Only print events of this kind
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Run a time-range query over a data directory
    Query {
        /// Directory holding hourly *.bin files
        #[arg(short, long)]
        data_dir: PathBuf,
        /// Window start, unix seconds
        #[arg(long)]
        start: i64,
        /// Window end, unix seconds
        #[arg(long)]
        end: i64,
        #[arg(short, long)]
        kind: Option<String>,
        #[arg(short, long)]
        namespace: Option<String>,
        #[arg(short, long)]
        group: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match Cli::parse().command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let mut reader = BlockReader::open(&input)?;
            let header = reader.read_file_header()?;
            println!("file:        {}", input.display());
            println!("version:     {}", header.format_version);
            println!("created_at:  {}", header.created_at);
            println!("compression: {}", header.compression.name());
            println!("encoding:    {}", header.encoding.name());
            println!("block_size:  {}", header.block_size_threshold);
            println!("checksums:   {}", header.checksum_enabled);

            match reader.read_index() {
                Ok((footer, section)) => {
                    let s = &section.statistics;
                    println!("index at:    {} (+{} bytes)",
                        footer.index_section_offset, footer.index_section_length);
                    println!("blocks:      {}", s.total_blocks);
                    println!("events:      {}", s.total_events);
                    println!("bytes:       {} raw, {} packed (ratio {:.3})",
                        s.total_uncompressed_bytes, s.total_compressed_bytes,
                        s.compression_ratio);
                    println!("kinds/ns/groups: {}/{}/{}",
                        s.unique_kinds, s.unique_namespaces, s.unique_groups);
                    println!("time range:  {} .. {}", s.timestamp_min, s.timestamp_max);
                    println!("states:      {}", section.final_resource_states.len());
                }
                Err(e) if e.is_incomplete() => {
                    println!("index:       (file is still being written — no footer)");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // ── Blocks ───────────────────────────────────────────────────────────
        Commands::Blocks { input } => {
            let mut reader = BlockReader::open(&input)?;
            let (_, section) = reader.read_index()?;
            println!("{:>4} {:>10} {:>10} {:>10} {:>7}  time range / kinds",
                "id", "offset", "packed", "raw", "events");
            for b in &section.block_metadata {
                let kinds: Vec<&str> = b.kinds.iter().map(String::as_str).collect();
                println!(
                    "{:>4} {:>10} {:>10} {:>10} {:>7}  {} .. {}  [{}]",
                    b.id, b.offset, b.compressed_length, b.uncompressed_length,
                    b.event_count, b.timestamp_min, b.timestamp_max, kinds.join(","),
                );
            }
        }

        // ── Events ───────────────────────────────────────────────────────────
        Commands::Events { input, kind } => {
            let mut reader = BlockReader::open(&input)?;
            let (_, section) = reader.read_index()?;
            for meta in &section.block_metadata {
                for ev in reader.read_block_events(meta)? {
                    if let Some(k) = &kind {
                        if ev.resource.kind != *k {
                            continue;
                        }
                    }
                    println!(
                        "{} {} {} {}",
                        ev.timestamp,
                        ev.event_type.name(),
                        ev.resource_key(),
                        ev.id,
                    );
                }
            }
        }

        // ── Query ────────────────────────────────────────────────────────────
        Commands::Query { data_dir, start, end, kind, namespace, group, limit } => {
            let req = QueryRequest {
                start_ts: start,
                end_ts:   end,
                filters:  QueryFilters { kind, namespace, group },
                limit,
            };
            let result = QueryExecutor::new(data_dir).execute(&req)?;
            for ev in &result.events {
                println!(
                    "{} {} {} {}",
                    ev.timestamp,
                    ev.event_type.name(),
                    ev.resource_key(),
                    ev.id,
                );
            }
            eprintln!(
                "{} events; {} files searched, {} blocks scanned, {} skipped, {} ms",
                result.count, result.files_searched, result.segments_scanned,
                result.segments_skipped, result.execution_time_ms,
            );
            for f in &result.failures {
                eprintln!("failed: {}: {}", f.path.display(), f.error);
            }
        }
    }

    Ok(())
}
