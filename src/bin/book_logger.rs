//! `book_logger`: subscribes to Kraken v2's `book` channel (L2) and streams
//! decoded snapshots/deltas to JSONL, maintaining per-symbol [`L2Book`]
//! state to surface the exchange's checksum invariant as it streams.

use clap::Parser;
use kraken_ingest::book::l2::L2Book;
use kraken_ingest::cli::{parse_pair_spec, CommonArgs};
use kraken_ingest::client::{ConnectionEvent, IngestClient, RoutedWriter, SingleWriter, ValidationOutcome};
use kraken_ingest::flush::FlushSegmentState;
use kraken_ingest::protocol::{ParserKind, SubscriptionOptions};
use kraken_ingest::writer::{BookJsonlWriter, MultiWriter};
use kraken_ingest::{OrderBookRecord, RecordKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const VALID_DEPTHS: [u32; 5] = [10, 25, 100, 500, 1000];

#[derive(Parser, Debug)]
#[command(name = "book_logger", about = "Stream Kraken v2 L2 order book updates to JSONL")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Book depth: 10, 25, 100, 500, or 1000.
    #[arg(short = 'd', long = "depth", default_value_t = 10)]
    depth: u32,

    /// Disable checksum validation against reconstructed book state.
    #[arg(long = "skip-validation")]
    skip_validation: bool,
}

fn main() {
    kraken_ingest::init_logging();
    let cli = Cli::parse();

    if !VALID_DEPTHS.contains(&cli.depth) {
        eprintln!("book_logger: --depth must be one of {VALID_DEPTHS:?}, got {}", cli.depth);
        std::process::exit(1);
    }

    let symbols = match parse_pair_spec(&cli.common.pairs) {
        Ok(symbols) => symbols,
        Err(e) => {
            eprintln!("book_logger: {e}");
            std::process::exit(1);
        }
    };

    let segment_mode = cli.common.segment_mode();
    let writer: RoutedWriter<BookJsonlWriter> = if cli.common.separate_files {
        RoutedWriter::Multi(MultiWriter::new(
            cli.common.output.clone(),
            ".jsonl",
            cli.common.flush_interval,
            cli.common.memory_threshold,
            segment_mode,
            BookJsonlWriter::new,
        ))
    } else {
        let engine =
            FlushSegmentState::new(cli.common.output.clone(), cli.common.flush_interval, cli.common.memory_threshold, segment_mode);
        RoutedWriter::Single(SingleWriter::new(BookJsonlWriter::new(cli.common.output.clone()), engine))
    };

    let mut client: IngestClient<OrderBookRecord, RoutedWriter<BookJsonlWriter>> = IngestClient::new(writer, ParserKind::Reflective);

    let processed = Arc::new(AtomicU64::new(0));
    {
        let processed = Arc::clone(&processed);
        client.set_update_callback(move |_record| {
            processed.fetch_add(1, Ordering::Relaxed);
        });
    }

    if !cli.skip_validation {
        let mut books: HashMap<String, L2Book> = HashMap::new();
        client.set_validator(move |record: &OrderBookRecord| {
            let book = books.entry(record.symbol.clone()).or_insert_with(L2Book::new);
            match record.kind {
                RecordKind::Snapshot => {
                    book.apply_snapshot(record);
                    ValidationOutcome::Ok
                }
                RecordKind::Update => match book.apply_update(record, false) {
                    Ok(Some(mismatch)) => ValidationOutcome::Warning(format!(
                        "{}: checksum mismatch expected {} computed {}",
                        mismatch.symbol, mismatch.expected, mismatch.computed
                    )),
                    Ok(None) => ValidationOutcome::Ok,
                    Err(e) => ValidationOutcome::Warning(e.to_string()),
                },
            }
        });
    }

    client.set_connection_callback(|event| match event {
        ConnectionEvent::Connected => info!("connected"),
        ConnectionEvent::Disconnected => info!("disconnected"),
        ConnectionEvent::Error(msg) => error!(%msg, "connection error"),
    });
    client.set_error_callback(|err| warn!(%err, "ingestion error"));

    // L2's subscription payload only ever carries `depth` (§4.1): the book
    // channel's initial snapshot is unconditional, unlike L3's opt-in one.
    let options = SubscriptionOptions { depth: Some(cli.depth), snapshot: false, token: None };
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
    println!("book_logger: {} records ingested, shut down cleanly", processed.load(Ordering::Relaxed));
}
