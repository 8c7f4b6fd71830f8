//! CLI command implementations
//!
//! Commands write JSON lines to stdout. Engine logs share stdout at
//! INFO and below, so `bench` raises the log floor through its config
//! (`log_level`) when only the report is wanted.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;

use crate::backend::{decode_transactions, MemStore, Transaction};
use crate::config::StoreConfig;
use crate::journal::{self, FileJournal};
use crate::observability::{log_event, Event};
use crate::store::{ObjectStore, StoreResult, StoreStats};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_json, write_json_to};

const BENCH_COLLECTION: &str = "bench";
/// Objects each stream rewrites in rotation
const BENCH_OBJECTS_PER_STREAM: u64 = 16;

/// Entry point: parse arguments and run the command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::CheckConfig { config } => check_config(&config),
        Command::DumpJournal { journal } => dump_journal(&journal),
        Command::Bench {
            config,
            ops,
            streams,
            bytes,
        } => {
            let report = bench(
                &config,
                BenchOptions {
                    ops_per_stream: ops,
                    streams,
                    payload_bytes: bytes,
                },
            )?;
            write_json(&report)
        }
    }
}

/// Load and validate a config file, then print it with defaults filled in
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = StoreConfig::load(config_path)?;
    write_json(&config)
}

/// Print the journal header, then one line per complete record
pub fn dump_journal(journal_path: &Path) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    dump_journal_to(&mut out, journal_path)?;
    out.flush()?;
    Ok(())
}

fn dump_journal_to<W: Write>(out: &mut W, journal_path: &Path) -> CliResult<()> {
    let scan = FileJournal::scan(journal_path)?;
    let trimmed_thru = scan.header.trimmed_thru;

    write_json_to(
        out,
        &json!({
            "kind": "header",
            "version": scan.header.version,
            "fsid": scan.header.fsid,
            "trimmed_thru": trimmed_thru,
            "records": scan.records.len(),
            "live_records": scan.live_records().count(),
            "valid_end": scan.valid_end,
            "torn_bytes": scan.torn_bytes,
        }),
    )?;

    for record in &scan.records {
        let mut line = json!({
            "kind": "record",
            "seq": record.seq,
            "bytes": record.payload.len(),
            "trimmed": record.seq <= trimmed_thru,
        });
        match decode_transactions(&record.payload) {
            Ok(transactions) => {
                let mutations: usize = transactions.iter().map(|t| t.mutations().len()).sum();
                line["transactions"] = json!(transactions.len());
                line["mutations"] = json!(mutations);
            }
            Err(e) => {
                line["decode_error"] = json!(e.to_string());
            }
        }
        write_json_to(out, &line)?;
    }
    Ok(())
}

/// Shape of a bench run
#[derive(Debug, Clone, Copy)]
pub struct BenchOptions {
    pub ops_per_stream: u64,
    pub streams: usize,
    pub payload_bytes: usize,
}

/// What a bench run did and how the engine saw it
#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub ops: u64,
    pub streams: usize,
    pub payload_bytes: usize,
    pub elapsed_ms: u128,
    pub ops_per_sec: f64,
    /// Seq of the final sync commit
    pub committed_seq: u64,
    pub stats: StoreStats,
}

/// Mount an in-memory backend with the configured journal and run
/// `streams` sequencers of `ops_per_stream` writes each
pub fn bench(config_path: &Path, options: BenchOptions) -> CliResult<BenchReport> {
    let config = StoreConfig::load(config_path)?;
    bench_with_config(config, options)
}

fn bench_with_config(config: StoreConfig, options: BenchOptions) -> CliResult<BenchReport> {
    if options.streams == 0 {
        return Err(CliError::config_error("--streams must be > 0"));
    }
    log_event(
        Event::ConfigLoaded,
        &[
            ("journal_mode", &config.journal_mode),
            ("op_threads", &config.op_threads),
        ],
    );

    let journal_backend = journal::open_configured(&config)?;
    let backend = Arc::new(MemStore::new());
    let store = ObjectStore::mount(config, backend, journal_backend)?;

    let mut setup = Transaction::new();
    setup.create_collection(BENCH_COLLECTION);
    store.apply_transactions(&store.default_sequencer(), vec![setup])?;

    let started = Instant::now();
    let outcome = thread::scope(|scope| {
        let handles: Vec<_> = (0..options.streams)
            .map(|stream| {
                let store = &store;
                scope.spawn(move || run_stream(store, stream, options))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| CliError::store_error("bench stream panicked"))?
                    .map_err(CliError::from)
            })
            .collect::<CliResult<Vec<()>>>()
    });
    outcome?;

    let committed_seq = store.sync_and_flush()?;
    let elapsed = started.elapsed();
    let stats = store.stats();
    store.shutdown()?;

    let ops = options.ops_per_stream * options.streams as u64;
    let secs = elapsed.as_secs_f64();
    Ok(BenchReport {
        ops,
        streams: options.streams,
        payload_bytes: options.payload_bytes,
        elapsed_ms: elapsed.as_millis(),
        ops_per_sec: if secs > 0.0 { ops as f64 / secs } else { 0.0 },
        committed_seq,
        stats,
    })
}

fn run_stream(store: &ObjectStore, stream: usize, options: BenchOptions) -> StoreResult<()> {
    let sequencer = store.create_sequencer(format!("bench-{}", stream));
    let data = vec![0xa5u8; options.payload_bytes];
    for n in 0..options.ops_per_stream {
        let oid = format!("s{}-o{}", stream, n % BENCH_OBJECTS_PER_STREAM);
        let mut tx = Transaction::new();
        tx.write(BENCH_COLLECTION, oid, 0, data.clone());
        store.submit_transactions(&sequencer, vec![tx], None, None)?;
    }
    store.flush(&sequencer);
    Ok(())
}
