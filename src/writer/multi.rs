//! Per-symbol multi-file writer: wraps any single-file writer kind `W`
//! behind a `symbol -> W` map, each with its own independent flush/segment
//! engine so rotation and buffering per symbol are independent.

use crate::error::Result;
use crate::flush::{FlushSegmentState, Flushable, SegmentMode};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub struct MultiWriter<W> {
    base_filename: String,
    ext: String,
    flush_interval_secs: u64,
    memory_threshold: usize,
    segment_mode: SegmentMode,
    make_writer: Box<dyn Fn(&str) -> W>,
    per_symbol: HashMap<String, (W, FlushSegmentState)>,
}

impl<W: Flushable> MultiWriter<W> {
    pub fn new(
        base_filename: impl Into<String>,
        ext: impl Into<String>,
        flush_interval_secs: u64,
        memory_threshold: usize,
        segment_mode: SegmentMode,
        make_writer: impl Fn(&str) -> W + 'static,
    ) -> Self {
        Self {
            base_filename: base_filename.into(),
            ext: ext.into(),
            flush_interval_secs,
            memory_threshold,
            segment_mode,
            make_writer: Box::new(make_writer),
            per_symbol: HashMap::new(),
        }
    }

    fn entry(&mut self, symbol: &str) -> &mut (W, FlushSegmentState) {
        self.per_symbol.entry(symbol.to_string()).or_insert_with(|| {
            let filename = FlushSegmentState::symbol_filename(&self.base_filename, symbol, &self.ext);
            let writer = (self.make_writer)(&filename);
            let state = FlushSegmentState::new(filename, self.flush_interval_secs, self.memory_threshold, self.segment_mode);
            (writer, state)
        })
    }

    /// Append one record for `symbol` and run the flush/segment engine
    /// for that symbol's writer only.
    pub fn append_and_check(&mut self, symbol: &str, now: DateTime<Utc>, push: impl FnOnce(&mut W)) -> Result<()> {
        let (writer, state) = self.entry(symbol);
        state.begin_record(writer, now)?;
        push(writer);
        state.end_record(writer)
    }

    pub fn force_flush_all(&mut self) -> Result<()> {
        for (writer, state) in self.per_symbol.values_mut() {
            state.force_flush(writer)?;
        }
        Ok(())
    }

    pub fn symbol_count(&self) -> usize {
        self.per_symbol.len()
    }

    /// Flushes performed so far, summed across every symbol's independent
    /// flush/segment engine.
    pub fn total_flush_count(&self) -> u64 {
        self.per_symbol.values().map(|(_, state)| state.flush_count()).sum()
    }
}
