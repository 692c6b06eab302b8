//! L1 ticker CSV writer. Fixed header once per segment file, adaptive
//! precision on the analytical fields, full precision is not required
//! here since every field round-trips through Rust's default `f64`
//! formatting (Testable Property 1).

use crate::error::Result;
use crate::flush::Flushable;
use crate::model::{TickerRecord, TICKER_RECORD_SIZE_ESTIMATE};
use crate::writer::format_adaptive;
use std::fs::{File, OpenOptions};
use std::io::Write;

const HEADER: &str = "timestamp,pair,type,bid,bid_qty,ask,ask_qty,last,volume,vwap,low,high,change,change_pct";

pub struct TickerCsvWriter {
    buffer: Vec<TickerRecord>,
    filename: String,
    file: Option<File>,
    header_written: bool,
}

impl TickerCsvWriter {
    pub fn new(filename: impl Into<String>) -> Self {
        Self { buffer: Vec::with_capacity(1000), filename: filename.into(), file: None, header_written: false }
    }

    pub fn push(&mut self, record: TickerRecord) {
        self.buffer.push(record);
    }

    fn open(&mut self, truncate: bool) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!truncate)
            .truncate(truncate)
            .open(&self.filename)?;
        self.file = Some(file);
        if truncate {
            self.header_written = false;
        }
        Ok(())
    }

    fn row(record: &TickerRecord) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            record.timestamp,
            record.symbol,
            record.kind.as_str(),
            format_adaptive(record.bid),
            format_adaptive(record.bid_qty),
            format_adaptive(record.ask),
            format_adaptive(record.ask_qty),
            format_adaptive(record.last),
            format_adaptive(record.volume),
            format_adaptive(record.vwap),
            format_adaptive(record.low),
            format_adaptive(record.high),
            format_adaptive(record.change),
            format_adaptive(record.change_pct),
        )
    }
}

impl Flushable for TickerCsvWriter {
    fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    fn record_size_estimate(&self) -> usize {
        TICKER_RECORD_SIZE_ESTIMATE
    }

    fn file_extension(&self) -> &str {
        ".csv"
    }

    fn perform_flush(&mut self) -> Result<()> {
        if self.file.is_none() {
            self.open(true)?;
        }
        let file = self.file.as_mut().expect("opened above");

        if !self.header_written {
            writeln!(file, "{HEADER}")?;
            self.header_written = true;
        }
        for record in &self.buffer {
            writeln!(file, "{}", Self::row(record))?;
        }
        file.flush()?;
        self.buffer.clear();
        Ok(())
    }

    fn perform_segment_transition(&mut self, new_filename: &str) -> Result<()> {
        self.filename = new_filename.to_string();
        self.open(true)
    }
}
