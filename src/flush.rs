//! Flush/segment engine (C2): a template-method protocol shared by every
//! record writer. A writer implements [`Flushable`] for the six operations
//! named below. The caller drives the engine in two steps around each
//! buffered append: [`FlushSegmentState::begin_record`] before the record
//! enters the buffer (so a segment rotation only ever drains the *prior*
//! window's data), then [`FlushSegmentState::end_record`] after, to apply
//! the time/size flush trigger to the buffer as it now stands. None of the
//! invariants here may be reimplemented by the writer itself.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMode {
    None,
    Hourly,
    Daily,
}

impl SegmentMode {
    /// UTC segment key for `now` under this mode. `None` has no key.
    fn key(&self, now: DateTime<Utc>) -> Option<String> {
        match self {
            SegmentMode::None => None,
            SegmentMode::Hourly => Some(now.format("%Y%m%d_%H").to_string()),
            SegmentMode::Daily => Some(now.format("%Y%m%d").to_string()),
        }
    }
}

/// The six operations a writer must supply to plug into the flush/segment
/// engine. Implemented per writer kind (CSV, JSONL), never per record.
pub trait Flushable {
    /// Number of records currently buffered.
    fn buffer_len(&self) -> usize;
    /// Compile-time-ish per-record size estimate, used for the memory
    /// trigger.
    fn record_size_estimate(&self) -> usize;
    /// File extension including the leading dot, or "" if none.
    fn file_extension(&self) -> &str;
    /// Drain the buffer to the current segment file. Must not clear the
    /// buffer on failure (the engine retries on the next tick).
    fn perform_flush(&mut self) -> crate::error::Result<()>;
    /// Open `new_filename` in truncate mode and reset any per-segment
    /// state (e.g. a CSV header-written flag).
    fn perform_segment_transition(&mut self, new_filename: &str) -> crate::error::Result<()>;
    /// Called once, the first time a segment key is established (not on
    /// every rotation) so a writer can do first-open bookkeeping distinct
    /// from rotation bookkeeping.
    fn on_segment_mode_initialized(&mut self) {}
}

/// Bookkeeping for one writer's flush/segment lifecycle.
pub struct FlushSegmentState {
    base_filename: String,
    segment_mode: SegmentMode,
    flush_interval: std::time::Duration,
    memory_threshold: usize,
    current_segment_key: Option<String>,
    current_segment_filename: String,
    last_flush_instant: Instant,
    flush_count: u64,
    segment_count: u64,
    segment_mode_initialized: bool,
}

/// Flushes beyond this count stop emitting the `[FLUSH]` info line and
/// drop to debug level, to avoid steady-state log spam.
const VERBOSE_FLUSH_LOG_LIMIT: u64 = 3;

impl FlushSegmentState {
    pub fn new(
        base_filename: impl Into<String>,
        flush_interval_secs: u64,
        memory_threshold: usize,
        segment_mode: SegmentMode,
    ) -> Self {
        let base_filename = base_filename.into();
        Self {
            current_segment_filename: base_filename.clone(),
            base_filename,
            segment_mode,
            flush_interval: std::time::Duration::from_secs(flush_interval_secs),
            memory_threshold,
            current_segment_key: None,
            last_flush_instant: Instant::now(),
            flush_count: 0,
            segment_count: 0,
            segment_mode_initialized: false,
        }
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    pub fn segment_count(&self) -> u64 {
        self.segment_count
    }

    pub fn current_segment_filename(&self) -> &str {
        &self.current_segment_filename
    }

    /// Insert `key` before the extension: `output.csv` -> `output.<key>.csv`;
    /// no extension -> append `.{key}`.
    fn filename_with_segment_key(&self, key: &str, ext: &str) -> String {
        if ext.is_empty() {
            format!("{}.{}", self.base_filename, key)
        } else {
            let stem = self.base_filename.strip_suffix(ext).unwrap_or(&self.base_filename);
            format!("{stem}.{key}{ext}")
        }
    }

    /// Per-symbol filename variant: `<base>_<symbol>.<key><ext>` with the
    /// symbol's '/' replaced by '_'. Used by the multi-file writer.
    pub fn symbol_filename(base_filename: &str, symbol: &str, ext: &str) -> String {
        let safe_symbol = symbol.replace('/', "_");
        let stem = base_filename.strip_suffix(ext).unwrap_or(base_filename);
        format!("{stem}_{safe_symbol}{ext}")
    }

    fn should_time_flush(&self) -> bool {
        self.flush_interval.as_secs() > 0 && self.last_flush_instant.elapsed() >= self.flush_interval
    }

    fn should_size_flush(&self, flushable: &impl Flushable) -> bool {
        self.memory_threshold > 0
            && flushable.buffer_len() * flushable.record_size_estimate() >= self.memory_threshold
    }

    /// Run before the incoming record is pushed into the buffer: rotates
    /// the segment for `now`'s window if it differs from the current one.
    /// Because the new record hasn't entered the buffer yet, whatever gets
    /// drained here belongs entirely to the outgoing window (§4.2).
    pub fn begin_record(&mut self, flushable: &mut impl Flushable, now: DateTime<Utc>) -> crate::error::Result<()> {
        self.maybe_rotate_segment(flushable, now)
    }

    /// Run after the record has been pushed: applies the time/size flush
    /// trigger to the buffer as it now stands.
    pub fn end_record(&mut self, flushable: &mut impl Flushable) -> crate::error::Result<()> {
        self.maybe_flush(flushable)
    }

    fn maybe_rotate_segment(&mut self, flushable: &mut impl Flushable, now: DateTime<Utc>) -> crate::error::Result<()> {
        let Some(new_key) = self.segment_mode.key(now) else {
            return Ok(());
        };

        if self.current_segment_key.as_deref() == Some(new_key.as_str()) {
            return Ok(());
        }

        if flushable.buffer_len() > 0 {
            flushable.perform_flush()?;
            self.last_flush_instant = Instant::now();
            self.flush_count += 1;
        }

        let ext = flushable.file_extension().to_string();
        let new_filename = self.filename_with_segment_key(&new_key, &ext);
        flushable.perform_segment_transition(&new_filename)?;

        if !self.segment_mode_initialized {
            flushable.on_segment_mode_initialized();
            self.segment_mode_initialized = true;
        }

        self.current_segment_key = Some(new_key.clone());
        self.current_segment_filename = new_filename;
        self.segment_count += 1;
        info!(segment = %self.current_segment_filename, segment_count = self.segment_count, "segment start");

        Ok(())
    }

    fn maybe_flush(&mut self, flushable: &mut impl Flushable) -> crate::error::Result<()> {
        if flushable.buffer_len() == 0 {
            return Ok(());
        }
        if !self.should_time_flush() && !self.should_size_flush(flushable) {
            return Ok(());
        }

        flushable.perform_flush()?;
        self.last_flush_instant = Instant::now();
        self.flush_count += 1;

        if self.flush_count <= VERBOSE_FLUSH_LOG_LIMIT {
            info!(flush_count = self.flush_count, file = %self.current_segment_filename, "[FLUSH]");
        } else {
            tracing::debug!(flush_count = self.flush_count, file = %self.current_segment_filename, "flush");
        }

        Ok(())
    }

    /// Force an immediate drain regardless of triggers, for the client's
    /// explicit `flush()` operation and final-flush-on-stop.
    pub fn force_flush(&mut self, flushable: &mut impl Flushable) -> crate::error::Result<()> {
        if flushable.buffer_len() == 0 {
            return Ok(());
        }
        flushable.perform_flush()?;
        self.last_flush_instant = Instant::now();
        self.flush_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct MockWriter {
        buffer: RefCell<Vec<u8>>,
        flushes: RefCell<Vec<String>>,
        transitions: RefCell<Vec<String>>,
        fail_flush: bool,
    }

    impl MockWriter {
        fn new() -> Self {
            Self { buffer: RefCell::new(Vec::new()), flushes: RefCell::new(Vec::new()), transitions: RefCell::new(Vec::new()), fail_flush: false }
        }
    }

    impl Flushable for MockWriter {
        fn buffer_len(&self) -> usize {
            self.buffer.borrow().len()
        }
        fn record_size_estimate(&self) -> usize {
            1
        }
        fn file_extension(&self) -> &str {
            ".csv"
        }
        fn perform_flush(&mut self) -> crate::error::Result<()> {
            if self.fail_flush {
                return Err(crate::error::IngestError::Writer("disk full".into()));
            }
            let drained: Vec<u8> = self.buffer.borrow_mut().drain(..).collect();
            self.flushes.borrow_mut().push(format!("{}bytes", drained.len()));
            Ok(())
        }
        fn perform_segment_transition(&mut self, new_filename: &str) -> crate::error::Result<()> {
            self.transitions.borrow_mut().push(new_filename.to_string());
            Ok(())
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn time_trigger_flushes_after_interval() {
        let mut state = FlushSegmentState::new("t.csv", 0, 0, SegmentMode::None);
        let mut writer = MockWriter::new();
        state.last_flush_instant = Instant::now() - std::time::Duration::from_secs(10);
        state.flush_interval = std::time::Duration::from_secs(5);

        state.begin_record(&mut writer, Utc::now()).unwrap();
        writer.buffer.borrow_mut().push(1);
        state.end_record(&mut writer).unwrap();
        assert_eq!(state.flush_count(), 1);
        assert_eq!(writer.flushes.borrow().len(), 1);
    }

    #[test]
    fn size_trigger_flushes_independent_of_time() {
        let mut state = FlushSegmentState::new("t.csv", 0, 2, SegmentMode::None);
        let mut writer = MockWriter::new();

        state.begin_record(&mut writer, Utc::now()).unwrap();
        writer.buffer.borrow_mut().extend_from_slice(&[1, 2, 3]);
        state.end_record(&mut writer).unwrap();
        assert_eq!(state.flush_count(), 1);
    }

    #[test]
    fn no_trigger_means_no_flush() {
        let mut state = FlushSegmentState::new("t.csv", 0, 0, SegmentMode::None);
        let mut writer = MockWriter::new();

        state.begin_record(&mut writer, Utc::now()).unwrap();
        writer.buffer.borrow_mut().push(1);
        state.end_record(&mut writer).unwrap();
        assert_eq!(state.flush_count(), 0);
    }

    #[test]
    fn hourly_segment_rotates_on_boundary_and_truncates() {
        let mut state = FlushSegmentState::new("t.csv", 1, 0, SegmentMode::Hourly);
        let mut writer = MockWriter::new();

        state.begin_record(&mut writer, ts("2025-11-12T10:59:59.5Z")).unwrap();
        writer.buffer.borrow_mut().push(1);
        state.end_record(&mut writer).unwrap();
        assert_eq!(state.current_segment_filename(), "t.20251112_10.csv");
        assert_eq!(state.segment_count(), 1);
        assert!(writer.flushes.borrow().is_empty(), "base filename t.csv must never be flushed to");

        state.begin_record(&mut writer, ts("2025-11-12T11:00:00.2Z")).unwrap();
        writer.buffer.borrow_mut().push(1);
        state.end_record(&mut writer).unwrap();
        assert_eq!(state.current_segment_filename(), "t.20251112_11.csv");
        assert_eq!(state.segment_count(), 2);
        assert_eq!(writer.transitions.borrow()[1], "t.20251112_11.csv");
        // The record pushed for the new (11:00) window must not have been
        // drained into the outgoing (10:00) file: only the prior window's
        // single record was flushed by the rotation.
        assert_eq!(writer.flushes.borrow().as_slice(), &["1bytes".to_string()]);
    }

    #[test]
    fn daily_segment_key_ignores_hour() {
        let mut state = FlushSegmentState::new("t.csv", 0, 0, SegmentMode::Daily);
        let mut writer = MockWriter::new();
        state.begin_record(&mut writer, ts("2025-11-12T01:00:00Z")).unwrap();
        writer.buffer.borrow_mut().push(1);
        state.end_record(&mut writer).unwrap();
        state.begin_record(&mut writer, ts("2025-11-12T23:59:00Z")).unwrap();
        writer.buffer.borrow_mut().push(1);
        state.end_record(&mut writer).unwrap();
        assert_eq!(state.segment_count(), 1);
        assert_eq!(state.current_segment_filename(), "t.20251112.csv");
    }

    #[test]
    fn failed_flush_preserves_buffer_for_retry() {
        let mut state = FlushSegmentState::new("t.csv", 0, 1, SegmentMode::None);
        let mut writer = MockWriter::new();
        writer.fail_flush = true;

        state.begin_record(&mut writer, Utc::now()).unwrap();
        writer.buffer.borrow_mut().push(1);
        let result = state.end_record(&mut writer);
        assert!(result.is_err());
        assert_eq!(state.flush_count(), 0);
        assert_eq!(writer.buffer_len(), 1);
    }

    #[test]
    fn no_extension_appends_key_rather_than_inserting() {
        let mut state = FlushSegmentState::new("output", 0, 0, SegmentMode::Daily);
        let writer = MockWriter::new();
        // override extension for this test
        struct NoExt(MockWriter);
        impl Flushable for NoExt {
            fn buffer_len(&self) -> usize { self.0.buffer_len() }
            fn record_size_estimate(&self) -> usize { self.0.record_size_estimate() }
            fn file_extension(&self) -> &str { "" }
            fn perform_flush(&mut self) -> crate::error::Result<()> { self.0.perform_flush() }
            fn perform_segment_transition(&mut self, f: &str) -> crate::error::Result<()> { self.0.perform_segment_transition(f) }
        }
        let mut wrapped = NoExt(writer);
        state.begin_record(&mut wrapped, ts("2025-11-12T01:00:00Z")).unwrap();
        wrapped.0.buffer.borrow_mut().push(1);
        state.end_record(&mut wrapped).unwrap();
        assert_eq!(state.current_segment_filename(), "output.20251112");
    }
}
