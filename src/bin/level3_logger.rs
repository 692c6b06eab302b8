//! `level3_logger`: subscribes to Kraken v2's authenticated `level3` channel
//! and streams decoded snapshots/deltas to JSONL, maintaining per-symbol
//! [`L3Book`] state to surface the exchange's checksum invariant.

use clap::Parser;
use kraken_ingest::book::l3::L3Book;
use kraken_ingest::cli::{parse_pair_spec, CommonArgs};
use kraken_ingest::client::{ConnectionEvent, IngestClient, RoutedWriter, SingleWriter, ValidationOutcome};
use kraken_ingest::credentials::resolve_token;
use kraken_ingest::flush::FlushSegmentState;
use kraken_ingest::protocol::{ParserKind, SubscriptionOptions};
use kraken_ingest::writer::{Level3JsonlWriter, MultiWriter};
use kraken_ingest::{Level3Record, RecordKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const VALID_DEPTHS: [u32; 3] = [10, 100, 1000];

#[derive(Parser, Debug)]
#[command(name = "level3_logger", about = "Stream Kraken v2 L3 individual-order book updates to JSONL")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Book depth: 10, 100, or 1000.
    #[arg(short = 'd', long = "depth", default_value_t = 10)]
    depth: u32,

    /// L3 authentication token (overrides --token-file and KRAKEN_WS_TOKEN).
    #[arg(long = "token")]
    token: Option<String>,

    /// Path to a file holding the L3 authentication token.
    #[arg(long = "token-file")]
    token_file: Option<String>,
}

fn main() {
    kraken_ingest::init_logging();
    let cli = Cli::parse();

    if !VALID_DEPTHS.contains(&cli.depth) {
        eprintln!("level3_logger: --depth must be one of {VALID_DEPTHS:?}, got {}", cli.depth);
        std::process::exit(1);
    }

    let token = match resolve_token(cli.token.as_deref(), cli.token_file.as_deref()) {
        Ok(token) => token,
        Err(e) => {
            eprintln!("level3_logger: {e}");
            std::process::exit(1);
        }
    };

    let symbols = match parse_pair_spec(&cli.common.pairs) {
        Ok(symbols) => symbols,
        Err(e) => {
            eprintln!("level3_logger: {e}");
            std::process::exit(1);
        }
    };

    let segment_mode = cli.common.segment_mode();
    let writer: RoutedWriter<Level3JsonlWriter> = if cli.common.separate_files {
        RoutedWriter::Multi(MultiWriter::new(
            cli.common.output.clone(),
            ".jsonl",
            cli.common.flush_interval,
            cli.common.memory_threshold,
            segment_mode,
            Level3JsonlWriter::new,
        ))
    } else {
        let engine =
            FlushSegmentState::new(cli.common.output.clone(), cli.common.flush_interval, cli.common.memory_threshold, segment_mode);
        RoutedWriter::Single(SingleWriter::new(Level3JsonlWriter::new(cli.common.output.clone()), engine))
    };

    let mut client: IngestClient<Level3Record, RoutedWriter<Level3JsonlWriter>> = IngestClient::new(writer, ParserKind::Reflective);

    let processed = Arc::new(AtomicU64::new(0));
    {
        let processed = Arc::clone(&processed);
        client.set_update_callback(move |_record| {
            processed.fetch_add(1, Ordering::Relaxed);
        });
    }

    let mut books: HashMap<String, L3Book> = HashMap::new();
    client.set_validator(move |record: &Level3Record| {
        let book = books.entry(record.symbol.clone()).or_insert_with(L3Book::new);
        match record.kind {
            RecordKind::Snapshot => {
                book.apply_snapshot(record);
                ValidationOutcome::Ok
            }
            RecordKind::Update => match book.apply_update(record) {
                Ok(Some(mismatch)) => ValidationOutcome::Warning(format!(
                    "{}: checksum mismatch expected {} computed {}",
                    mismatch.symbol, mismatch.expected, mismatch.computed
                )),
                Ok(None) => ValidationOutcome::Ok,
                Err(e) => ValidationOutcome::Fatal(e.to_string()),
            },
        }
    });

    client.set_connection_callback(|event| match event {
        ConnectionEvent::Connected => info!("connected"),
        ConnectionEvent::Disconnected => info!("disconnected"),
        ConnectionEvent::Error(msg) => error!(%msg, "connection error"),
    });
    client.set_error_callback(|err| warn!(%err, "ingestion error"));

    let options = SubscriptionOptions { depth: Some(cli.depth), snapshot: true, token: Some(token) };
    client.start(symbols, options);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst)) {
            error!(error = %e, "could not install signal handler");
        }
    }

    while !shutdown.load(Ordering::SeqCst) && client.is_running() {
        std::thread::sleep(Duration::from_millis(200));
    }

    client.stop();
    println!("level3_logger: {} records ingested, shut down cleanly", processed.load(Ordering::Relaxed));
}
