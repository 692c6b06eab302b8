//! `sampler`: offline C7 tool. Replays a persisted `book` or `level3` JSONL
//! log through book state and emits time-bucketed analytical CSV rows.

use clap::Parser;
use kraken_ingest::cli::parse_interval;
use kraken_ingest::sampling::{self, Channel, SamplerConfig};

#[derive(Parser, Debug)]
#[command(name = "sampler", about = "Replay a persisted order-book log into sampled analytical CSV rows")]
struct Cli {
    /// Input JSONL log path (as written by book_logger or level3_logger).
    #[arg(short = 'i', long = "input")]
    input: String,

    /// Which channel the input log was recorded from.
    #[arg(short = 'c', long = "channel", value_enum)]
    channel: ChannelArg,

    /// Output CSV file.
    #[arg(short = 'o', long = "output", default_value = "sampled.csv")]
    output: String,

    /// Sampling interval, e.g. `30s`, `5m`, `1h`.
    #[arg(long = "interval", default_value = "60s")]
    interval: String,

    /// Emit one output file per symbol instead of one shared file.
    #[arg(long = "separate-files")]
    separate_files: bool,

    /// Skip checksum verification against reconstructed book state.
    #[arg(long = "skip-validation")]
    skip_validation: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ChannelArg {
    Book,
    Level3,
}

fn main() {
    kraken_ingest::init_logging();
    let cli = Cli::parse();

    let interval = match parse_interval(&cli.interval) {
        Ok(interval) => interval,
        Err(e) => {
            eprintln!("sampler: {e}");
            std::process::exit(1);
        }
    };

    let channel = match cli.channel {
        ChannelArg::Book => Channel::Book,
        ChannelArg::Level3 => Channel::Level3,
    };

    let config = SamplerConfig {
        input_path: cli.input,
        output_path: cli.output,
        interval,
        channel,
        separate_files: cli.separate_files,
        skip_validation: cli.skip_validation,
    };

    match sampling::run(config) {
        Ok(summary) => {
            println!(
                "sampler: {} records processed, {} rows emitted, {} checksum mismatches",
                summary.records_processed, summary.rows_emitted, summary.checksum_mismatches
            );
        }
        Err(e) => {
            eprintln!("sampler: {e}");
            std::process::exit(1);
        }
    }
}
