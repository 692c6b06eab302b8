//! Sampling/Metrics Engine (C7): replay a persisted L2 or L3 JSONL log,
//! apply every record to book state (C6), and emit time-bucketed
//! analytical CSV rows (C3 idiom: adaptive-precision formatting, no
//! flush/segment engine since this is an offline batch tool rather than a
//! live ingestion writer).

use crate::book::l2::L2Book;
use crate::book::l3::{L3Book, Side};
use crate::checksum::CHECKSUM_DEPTH;
use crate::error::{IngestError, Result};
use crate::model::{Level3Order, Level3Record, OrderBookRecord, PriceLevel, RecordKind};
use crate::writer::format_adaptive;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Book,
    Level3,
}

pub struct SamplerConfig {
    pub input_path: String,
    pub output_path: String,
    pub interval: Duration,
    pub channel: Channel,
    pub separate_files: bool,
    pub skip_validation: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SamplerSummary {
    pub records_processed: u64,
    pub rows_emitted: u64,
    pub checksum_mismatches: u64,
}

const L2_HEADER: &str = "timestamp,symbol,best_bid,best_bid_qty,best_ask,best_ask_qty,spread,spread_bps,mid_price,bid_volume_top10,ask_volume_top10,imbalance,depth_bid_10bps,depth_ask_10bps,depth_bid_25bps,depth_ask_25bps,depth_bid_50bps,depth_ask_50bps";

const L3_HEADER: &str = "timestamp,symbol,best_bid,best_bid_qty,best_ask,best_ask_qty,spread,spread_bps,mid_price,bid_volume_top10,ask_volume_top10,imbalance,depth_bid_10bps,depth_ask_10bps,depth_bid_25bps,depth_ask_25bps,depth_bid_50bps,depth_ask_50bps,order_count_bid,order_count_ask,orders_at_best_bid,orders_at_best_ask,avg_order_size_bid,avg_order_size_ask,adds,modifies,deletes,arrival_rate,cancel_rate";

/// Run the sampler end to end: stream `config.input_path` line by line,
/// maintain one book per symbol, and write time-bucketed rows to
/// `config.output_path` (or one file per symbol under `--separate-files`).
pub fn run(config: SamplerConfig) -> Result<SamplerSummary> {
    match config.channel {
        Channel::Book => run_book(&config),
        Channel::Level3 => run_level3(&config),
    }
}

struct RowWriter {
    shared: Option<SampleCsvWriter>,
    per_symbol: HashMap<String, SampleCsvWriter>,
    separate_files: bool,
    output_path: String,
    header: &'static str,
}

impl RowWriter {
    fn new(output_path: &str, separate_files: bool, header: &'static str) -> Result<Self> {
        let shared = if separate_files { None } else { Some(SampleCsvWriter::create(output_path)?) };
        Ok(Self { shared, per_symbol: HashMap::new(), separate_files, output_path: output_path.to_string(), header })
    }

    fn write(&mut self, symbol: &str, row: &str) -> Result<()> {
        if self.separate_files {
            if !self.per_symbol.contains_key(symbol) {
                let path = symbol_output_path(&self.output_path, symbol);
                self.per_symbol.insert(symbol.to_string(), SampleCsvWriter::create(&path)?);
            }
            self.per_symbol.get_mut(symbol).unwrap().write_row(self.header, row)
        } else {
            self.shared.as_mut().expect("shared writer always present when not separate_files").write_row(self.header, row)
        }
    }
}

fn symbol_output_path(base: &str, symbol: &str) -> String {
    let safe_symbol = symbol.replace('/', "_");
    match base.rfind('.') {
        Some(idx) => format!("{}_{}{}", &base[..idx], safe_symbol, &base[idx..]),
        None => format!("{base}_{safe_symbol}"),
    }
}

struct SampleCsvWriter {
    file: File,
    header_written: bool,
}

impl SampleCsvWriter {
    fn create(path: &str) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { file, header_written: false })
    }

    fn write_row(&mut self, header: &str, row: &str) -> Result<()> {
        if !self.header_written {
            writeln!(self.file, "{header}")?;
            self.header_written = true;
        }
        writeln!(self.file, "{row}")?;
        Ok(())
    }
}

struct L2SymbolState {
    book: L2Book,
    next_emit: DateTime<Utc>,
}

fn run_book(config: &SamplerConfig) -> Result<SamplerSummary> {
    let file = File::open(&config.input_path)
        .map_err(|e| IngestError::Configuration(format!("could not open {}: {e}", config.input_path)))?;
    let reader = BufReader::new(file);
    let mut writer = RowWriter::new(&config.output_path, config.separate_files, L2_HEADER)?;
    let mut states: HashMap<String, L2SymbolState> = HashMap::new();
    let mut summary = SamplerSummary::default();
    let interval = chrono::Duration::from_std(config.interval).expect("interval fits in chrono::Duration range");

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(record) = parse_book_line(&line) else { continue };
        summary.records_processed += 1;

        let ts = parse_timestamp(&record.timestamp);
        let state = states.entry(record.symbol.clone()).or_insert_with(|| L2SymbolState { book: L2Book::new(), next_emit: ts + interval });

        match record.kind {
            RecordKind::Snapshot => state.book.apply_snapshot(&record),
            RecordKind::Update => {
                let strict = false;
                match state.book.apply_update(&record, strict) {
                    Ok(Some(_)) if !config.skip_validation => summary.checksum_mismatches += 1,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, symbol = %record.symbol, "book update rejected"),
                }
            }
        }

        if ts >= state.next_emit {
            let row = l2_row(ts, &record.symbol, &state.book);
            writer.write(&record.symbol, &row)?;
            summary.rows_emitted += 1;
            state.next_emit = ts + interval;
        }
    }

    info!(records = summary.records_processed, rows = summary.rows_emitted, "book sampling complete");
    Ok(summary)
}

struct L3SymbolState {
    book: L3Book,
    next_emit: DateTime<Utc>,
    counters_at_last_emit: crate::book::l3::EventCounters,
    last_emit: DateTime<Utc>,
}

fn run_level3(config: &SamplerConfig) -> Result<SamplerSummary> {
    let file = File::open(&config.input_path)
        .map_err(|e| IngestError::Configuration(format!("could not open {}: {e}", config.input_path)))?;
    let reader = BufReader::new(file);
    let mut writer = RowWriter::new(&config.output_path, config.separate_files, L3_HEADER)?;
    let mut states: HashMap<String, L3SymbolState> = HashMap::new();
    let mut summary = SamplerSummary::default();
    let interval = chrono::Duration::from_std(config.interval).expect("interval fits in chrono::Duration range");

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(record) = parse_level3_line(&line) else { continue };
        summary.records_processed += 1;

        let ts = parse_timestamp(&record.timestamp);
        let state = states.entry(record.symbol.clone()).or_insert_with(|| L3SymbolState {
            book: L3Book::new(),
            next_emit: ts + interval,
            counters_at_last_emit: crate::book::l3::EventCounters::default(),
            last_emit: ts,
        });

        match record.kind {
            RecordKind::Snapshot => state.book.apply_snapshot(&record),
            RecordKind::Update => match state.book.apply_update(&record) {
                Ok(Some(_)) if !config.skip_validation => summary.checksum_mismatches += 1,
                Ok(_) => {}
                Err(e) => warn!(error = %e, symbol = %record.symbol, "book update rejected"),
            },
        }

        if ts >= state.next_emit {
            let elapsed_secs = (ts - state.last_emit).num_milliseconds().max(1) as f64 / 1000.0;
            let counters = state.book.counters();
            let adds = counters.adds.saturating_sub(state.counters_at_last_emit.adds);
            let modifies = counters.modifies.saturating_sub(state.counters_at_last_emit.modifies);
            let deletes = counters.deletes.saturating_sub(state.counters_at_last_emit.deletes);
            // §4.7: adds/s and deletes/s, not a share of all records or all events.
            let arrival_rate = adds as f64 / elapsed_secs;
            let cancel_rate = deletes as f64 / elapsed_secs;

            let row = l3_row(ts, &record.symbol, &state.book, adds, modifies, deletes, arrival_rate, cancel_rate);
            writer.write(&record.symbol, &row)?;
            summary.rows_emitted += 1;

            state.next_emit = ts + interval;
            state.counters_at_last_emit = counters;
            state.last_emit = ts;
        }
    }

    info!(records = summary.records_processed, rows = summary.rows_emitted, "level3 sampling complete");
    Ok(summary)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|_| Utc::now())
}

fn l2_row(ts: DateTime<Utc>, symbol: &str, book: &L2Book) -> String {
    let (best_bid, best_bid_qty) = book.best_bid().unwrap_or((0.0, 0.0));
    let (best_ask, best_ask_qty) = book.best_ask().unwrap_or((0.0, 0.0));
    let mid = book.mid_price().unwrap_or(0.0);
    let spread = if best_bid > 0.0 && best_ask > 0.0 { best_ask - best_bid } else { 0.0 };
    let spread_bps = if mid > 0.0 { spread / mid * 10_000.0 } else { 0.0 };
    let bid_vol_top10: f64 = book.bid_levels().take(CHECKSUM_DEPTH).map(|(_, q)| q).sum();
    let ask_vol_top10: f64 = book.ask_levels().take(CHECKSUM_DEPTH).map(|(_, q)| q).sum();
    let imbalance = imbalance_of(bid_vol_top10, ask_vol_top10);
    let d10 = book.depth_within_bps(10.0).unwrap_or_default();
    let d25 = book.depth_within_bps(25.0).unwrap_or_default();
    let d50 = book.depth_within_bps(50.0).unwrap_or_default();

    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        symbol,
        format_adaptive(best_bid),
        format_adaptive(best_bid_qty),
        format_adaptive(best_ask),
        format_adaptive(best_ask_qty),
        format_adaptive(spread),
        format_adaptive(spread_bps),
        format_adaptive(mid),
        format_adaptive(bid_vol_top10),
        format_adaptive(ask_vol_top10),
        format_adaptive(imbalance),
        format_adaptive(d10.bid_vol),
        format_adaptive(d10.ask_vol),
        format_adaptive(d25.bid_vol),
        format_adaptive(d25.ask_vol),
        format_adaptive(d50.bid_vol),
        format_adaptive(d50.ask_vol),
    )
}

#[allow(clippy::too_many_arguments)]
fn l3_row(
    ts: DateTime<Utc>,
    symbol: &str,
    book: &L3Book,
    adds: u64,
    modifies: u64,
    deletes: u64,
    arrival_rate: f64,
    cancel_rate: f64,
) -> String {
    let best_bid = book.best_bid().unwrap_or(0.0);
    let best_ask = book.best_ask().unwrap_or(0.0);
    let best_bid_qty = book.best_bid_qty().unwrap_or(0.0);
    let best_ask_qty = book.best_ask_qty().unwrap_or(0.0);
    let mid = book.mid_price().unwrap_or(0.0);
    let spread = if best_bid > 0.0 && best_ask > 0.0 { best_ask - best_bid } else { 0.0 };
    let spread_bps = if mid > 0.0 { spread / mid * 10_000.0 } else { 0.0 };
    let bid_vol_top10: f64 = book.bid_levels().take(CHECKSUM_DEPTH).map(|(_, q)| q).sum();
    let ask_vol_top10: f64 = book.ask_levels().take(CHECKSUM_DEPTH).map(|(_, q)| q).sum();
    let imbalance = imbalance_of(bid_vol_top10, ask_vol_top10);
    let d10 = book.depth_within_bps(10.0).unwrap_or_default();
    let d25 = book.depth_within_bps(25.0).unwrap_or_default();
    let d50 = book.depth_within_bps(50.0).unwrap_or_default();

    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        symbol,
        format_adaptive(best_bid),
        format_adaptive(best_bid_qty),
        format_adaptive(best_ask),
        format_adaptive(best_ask_qty),
        format_adaptive(spread),
        format_adaptive(spread_bps),
        format_adaptive(mid),
        format_adaptive(bid_vol_top10),
        format_adaptive(ask_vol_top10),
        format_adaptive(imbalance),
        format_adaptive(d10.bid_vol),
        format_adaptive(d10.ask_vol),
        format_adaptive(d25.bid_vol),
        format_adaptive(d25.ask_vol),
        format_adaptive(d50.bid_vol),
        format_adaptive(d50.ask_vol),
        book.order_count(Side::Bid),
        book.order_count(Side::Ask),
        book.orders_at_best(Side::Bid),
        book.orders_at_best(Side::Ask),
        format_adaptive(book.avg_order_size(Side::Bid)),
        format_adaptive(book.avg_order_size(Side::Ask)),
        adds,
        modifies,
        deletes,
        format_adaptive(arrival_rate),
        format_adaptive(cancel_rate),
    )
}

fn imbalance_of(bid_vol: f64, ask_vol: f64) -> f64 {
    let total = bid_vol + ask_vol;
    if total > 0.0 {
        (bid_vol - ask_vol) / total
    } else {
        0.0
    }
}

fn string_field(entry: &Value, field: &str) -> Option<String> {
    entry.get(field).and_then(Value::as_str).map(String::from)
}

/// Inverse of `src/writer/jsonl_writer.rs`'s `book_envelope`: unwrap the
/// persisted `{timestamp, channel, type, data}` line back into an
/// [`OrderBookRecord`]. Malformed lines are skipped with a warning, never
/// fatal to the replay.
fn parse_book_line(line: &str) -> Option<OrderBookRecord> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "skipping malformed line");
            return None;
        }
    };
    let kind = match value.get("type").and_then(Value::as_str) {
        Some("snapshot") => RecordKind::Snapshot,
        Some("update") => RecordKind::Update,
        _ => return None,
    };
    let timestamp = string_field(&value, "timestamp").unwrap_or_default();
    let data = value.get("data")?;
    let symbol = string_field(data, "symbol")?;
    let bids = parse_level_pairs(data.get("bids")?)?;
    let asks = parse_level_pairs(data.get("asks")?)?;
    let checksum = data.get("checksum").and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(OrderBookRecord { timestamp, symbol, kind, bids, asks, checksum })
}

fn parse_level_pairs(arr: &Value) -> Option<Vec<PriceLevel>> {
    let arr = arr.as_array()?;
    let mut out = Vec::with_capacity(arr.len());
    for pair in arr {
        let pair = pair.as_array()?;
        let price = pair.first()?.as_f64()?;
        let qty = pair.get(1)?.as_f64()?;
        out.push(PriceLevel { price, qty });
    }
    Some(out)
}

fn parse_level3_line(line: &str) -> Option<Level3Record> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "skipping malformed line");
            return None;
        }
    };
    let kind = match value.get("type").and_then(Value::as_str) {
        Some("snapshot") => RecordKind::Snapshot,
        Some("update") => RecordKind::Update,
        _ => return None,
    };
    let timestamp = string_field(&value, "timestamp").unwrap_or_default();
    let data = value.get("data")?;
    let symbol = string_field(data, "symbol")?;
    let bids: Vec<Level3Order> = serde_json::from_value(data.get("bids")?.clone()).ok()?;
    let asks: Vec<Level3Order> = serde_json::from_value(data.get("asks")?.clone()).ok()?;
    let checksum = data.get("checksum").and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(Level3Record { timestamp, symbol, kind, bids, asks, checksum })
}
