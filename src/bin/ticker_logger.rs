//! `ticker_logger`: subscribes to Kraken v2's `ticker` channel (L1) for the
//! given pairs and streams decoded records to CSV via [`IngestClient`].

use clap::Parser;
use kraken_ingest::cli::{parse_pair_spec, CommonArgs};
use kraken_ingest::client::{ConnectionEvent, IngestClient, RoutedWriter, SingleWriter};
use kraken_ingest::flush::FlushSegmentState;
use kraken_ingest::protocol::{ParserKind, SubscriptionOptions};
use kraken_ingest::writer::{MultiWriter, TickerCsvWriter};
use kraken_ingest::TickerRecord;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ticker_logger", about = "Stream Kraken v2 ticker updates to CSV")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() {
    kraken_ingest::init_logging();
    let cli = Cli::parse();

    let symbols = match parse_pair_spec(&cli.common.pairs) {
        Ok(symbols) => symbols,
        Err(e) => {
            eprintln!("ticker_logger: {e}");
            std::process::exit(1);
        }
    };

    let segment_mode = cli.common.segment_mode();
    let writer: RoutedWriter<TickerCsvWriter> = if cli.common.separate_files {
        RoutedWriter::Multi(MultiWriter::new(
            cli.common.output.clone(),
            ".csv",
            cli.common.flush_interval,
            cli.common.memory_threshold,
            segment_mode,
            TickerCsvWriter::new,
        ))
    } else {
        let engine =
            FlushSegmentState::new(cli.common.output.clone(), cli.common.flush_interval, cli.common.memory_threshold, segment_mode);
        RoutedWriter::Single(SingleWriter::new(TickerCsvWriter::new(cli.common.output.clone()), engine))
    };

    let mut client: IngestClient<TickerRecord, RoutedWriter<TickerCsvWriter>> = IngestClient::new(writer, ParserKind::Reflective);

    let processed = Arc::new(AtomicU64::new(0));
    {
        let processed = Arc::clone(&processed);
        client.set_update_callback(move |_record| {
            processed.fetch_add(1, Ordering::Relaxed);
        });
    }
    client.set_connection_callback(|event| match event {
        ConnectionEvent::Connected => info!("connected"),
        ConnectionEvent::Disconnected => info!("disconnected"),
        ConnectionEvent::Error(msg) => error!(%msg, "connection error"),
    });
    client.set_error_callback(|err| error!(%err, "ingestion error"));

    client.start(symbols, SubscriptionOptions::default());

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
    println!("ticker_logger: {} records ingested, shut down cleanly", processed.load(Ordering::Relaxed));
}
