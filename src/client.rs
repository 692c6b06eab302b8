//! Ingestion Client (C5): owns the background I/O thread, the parser, the
//! writer (single or per-symbol), and — when validation is enabled — the
//! book state used to check the exchange's checksum invariant. Generic
//! over the decoded record type `R` and the writer `CW` so the same fan-out
//! logic (history, pending queue, flush/segment engine, callbacks) serves
//! all three channels; `src/bin/*.rs` instantiate it per channel.

use crate::error::{IngestError, Result};
use crate::protocol::{AnyRecord, ClosureSink, ParserKind, SubscriptionOptions};
use crate::model::{Level3Record, OrderBookRecord, StatusEvent, TickerRecord};
use crate::ws_session::{SessionEvent, WsSession, KRAKEN_WS_V2_URL};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// Bound on how long `stop()` waits for the I/O thread to join before
/// giving up and returning without forcibly killing it (§5: "the
/// background thread is not force-killed").
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A record type usable by [`IngestClient`]: it must be able to name its
/// own symbol (for per-symbol writer routing), be serializable (for
/// `save_to_csv`'s ad-hoc snapshot), and pick itself out of the parser's
/// tagged [`AnyRecord`] union (ignoring the other two channels' records).
pub trait Decoded: Clone + Serialize + Send + 'static {
    fn symbol(&self) -> &str;
    /// The Kraken v2 wire channel name this record type decodes from.
    const CHANNEL: &'static str;
    /// `Some(self)` if `any` is this record type's variant, else `None`.
    fn from_any(any: AnyRecord) -> Option<Self>
    where
        Self: Sized;
}

impl Decoded for TickerRecord {
    fn symbol(&self) -> &str {
        &self.symbol
    }
    const CHANNEL: &'static str = "ticker";
    fn from_any(any: AnyRecord) -> Option<Self> {
        match any {
            AnyRecord::Ticker(record) => Some(record),
            _ => None,
        }
    }
}

impl Decoded for OrderBookRecord {
    fn symbol(&self) -> &str {
        &self.symbol
    }
    const CHANNEL: &'static str = "book";
    fn from_any(any: AnyRecord) -> Option<Self> {
        match any {
            AnyRecord::Book(record) => Some(record),
            _ => None,
        }
    }
}

impl Decoded for Level3Record {
    fn symbol(&self) -> &str {
        &self.symbol
    }
    const CHANNEL: &'static str = "level3";
    fn from_any(any: AnyRecord) -> Option<Self> {
        match any {
            AnyRecord::Level3(record) => Some(record),
            _ => None,
        }
    }
}

/// What a writer backend (single-file or per-symbol multi-file) must
/// support to plug into the client's fan-out.
pub trait ClientWriter<R>: Send {
    fn ingest(&mut self, record: R, now: chrono::DateTime<Utc>) -> Result<()>;
    fn force_flush(&mut self) -> Result<()>;
    /// Total flushes performed so far, summed across every underlying
    /// flush/segment engine. Used by the client to detect "a flush just
    /// happened" so it can drain `history`/`pending` in step (§4.5: a
    /// periodic flush drains history so callback-driven users don't leak
    /// memory), without the writer itself knowing about those collections.
    fn flush_count(&self) -> u64;
}

/// Bundles a single-file writer with its own flush/segment engine. Most
/// `ClientWriter` impls for single-file mode wrap their writer this way.
pub struct SingleWriter<W> {
    pub writer: W,
    pub engine: crate::flush::FlushSegmentState,
}

impl<W> SingleWriter<W> {
    pub fn new(writer: W, engine: crate::flush::FlushSegmentState) -> Self {
        Self { writer, engine }
    }
}

/// A writer that accepts one record type by value (`push_record` rather
/// than `push`, so [`ClientWriter`] impls stay generic over `R`).
pub trait RecordSink<R> {
    fn push_record(&mut self, record: R);
}

impl RecordSink<TickerRecord> for crate::writer::TickerCsvWriter {
    fn push_record(&mut self, record: TickerRecord) {
        self.push(record);
    }
}

impl RecordSink<OrderBookRecord> for crate::writer::BookJsonlWriter {
    fn push_record(&mut self, record: OrderBookRecord) {
        self.push(record);
    }
}

impl RecordSink<Level3Record> for crate::writer::Level3JsonlWriter {
    fn push_record(&mut self, record: Level3Record) {
        self.push(record);
    }
}

impl<R, W> ClientWriter<R> for SingleWriter<W>
where
    W: crate::flush::Flushable + RecordSink<R> + Send,
{
    fn ingest(&mut self, record: R, now: chrono::DateTime<Utc>) -> Result<()> {
        // Rotate for `now`'s window before the record is buffered, so a
        // boundary crossing drains only the outgoing window's data (§4.2).
        self.engine.begin_record(&mut self.writer, now)?;
        self.writer.push_record(record);
        self.engine.end_record(&mut self.writer)
    }

    fn force_flush(&mut self) -> Result<()> {
        self.engine.force_flush(&mut self.writer)
    }

    fn flush_count(&self) -> u64 {
        self.engine.flush_count()
    }
}

impl<R, W> ClientWriter<R> for crate::writer::MultiWriter<W>
where
    R: Decoded,
    W: crate::flush::Flushable + RecordSink<R> + Send,
{
    fn ingest(&mut self, record: R, now: chrono::DateTime<Utc>) -> Result<()> {
        let symbol = record.symbol().to_string();
        self.append_and_check(&symbol, now, move |w| w.push_record(record))
    }

    fn force_flush(&mut self) -> Result<()> {
        self.force_flush_all()
    }

    fn flush_count(&self) -> u64 {
        self.total_flush_count()
    }
}

/// Picks between one shared file and `--separate-files` per-symbol mode at
/// runtime, so the four `src/bin/*.rs` binaries can build an
/// `IngestClient` without choosing the writer's concrete type at compile
/// time.
pub enum RoutedWriter<W> {
    Single(SingleWriter<W>),
    Multi(crate::writer::MultiWriter<W>),
}

impl<R, W> ClientWriter<R> for RoutedWriter<W>
where
    R: Decoded,
    W: crate::flush::Flushable + RecordSink<R> + Send,
{
    fn ingest(&mut self, record: R, now: chrono::DateTime<Utc>) -> Result<()> {
        match self {
            RoutedWriter::Single(w) => w.ingest(record, now),
            RoutedWriter::Multi(w) => w.ingest(record, now),
        }
    }

    fn force_flush(&mut self) -> Result<()> {
        match self {
            RoutedWriter::Single(w) => w.force_flush(),
            RoutedWriter::Multi(w) => w.force_flush(),
        }
    }

    fn flush_count(&self) -> u64 {
        match self {
            RoutedWriter::Single(w) => w.flush_count(),
            RoutedWriter::Multi(w) => w.flush_count(),
        }
    }
}

/// Outcome of the optional per-record validator (book-state checksum
/// check) a caller installs via [`IngestClient::set_validator`].
pub enum ValidationOutcome {
    Ok,
    Warning(String),
    Fatal(String),
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Error(String),
}

struct ClientData<R, CW> {
    writer: CW,
    history: Vec<R>,
    pending: Vec<R>,
}

struct Callbacks<R> {
    connection: Option<Box<dyn Fn(ConnectionEvent) + Send>>,
    error: Option<Box<dyn Fn(IngestError) + Send>>,
    #[allow(clippy::type_complexity)]
    _marker: std::marker::PhantomData<fn(&R)>,
}

impl<R> Default for Callbacks<R> {
    fn default() -> Self {
        Self { connection: None, error: None, _marker: std::marker::PhantomData }
    }
}

/// The ingestion client (C5). `R` is the decoded record type for this
/// channel; `CW` is the writer backend (single-file or per-symbol).
pub struct IngestClient<R, CW> {
    data: Arc<Mutex<ClientData<R, CW>>>,
    callbacks: Arc<Mutex<Callbacks<R>>>,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    started: AtomicBool,
    update_callback: Option<Box<dyn Fn(&R) + Send>>,
    validator: Option<Box<dyn FnMut(&R) -> ValidationOutcome + Send>>,
    thread: Option<JoinHandle<()>>,
    parser: ParserKind,
}

impl<R, CW> IngestClient<R, CW>
where
    R: Decoded,
    CW: ClientWriter<R> + 'static,
{
    pub fn new(writer: CW, parser: ParserKind) -> Self {
        Self {
            data: Arc::new(Mutex::new(ClientData { writer, history: Vec::with_capacity(1000), pending: Vec::with_capacity(1000) })),
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            connected: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            update_callback: None,
            validator: None,
            thread: None,
            parser,
        }
    }

    /// Install the hot-path update callback. Must be called before
    /// [`Self::start`]; calling it afterwards is documented UB upstream
    /// and is rejected here with a loud warning rather than silently
    /// accepted or panicking.
    pub fn set_update_callback(&mut self, callback: impl Fn(&R) + Send + 'static) {
        if self.started.load(Ordering::SeqCst) {
            warn!("set_update_callback called after start(); ignoring (documented UB)");
            return;
        }
        self.update_callback = Some(Box::new(callback));
    }

    /// Install the book-state validator. Same before-start contract as
    /// [`Self::set_update_callback`].
    pub fn set_validator(&mut self, validator: impl FnMut(&R) -> ValidationOutcome + Send + 'static) {
        if self.started.load(Ordering::SeqCst) {
            warn!("set_validator called after start(); ignoring (documented UB)");
            return;
        }
        self.validator = Some(Box::new(validator));
    }

    pub fn set_connection_callback(&self, callback: impl Fn(ConnectionEvent) + Send + 'static) {
        self.callbacks.lock().unwrap().connection = Some(Box::new(callback));
    }

    pub fn set_error_callback(&self, callback: impl Fn(IngestError) + Send + 'static) {
        self.callbacks.lock().unwrap().error = Some(Box::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.data.lock().unwrap().pending.len()
    }

    pub fn get_updates(&self) -> Vec<R> {
        let mut data = self.data.lock().unwrap();
        std::mem::take(&mut data.pending)
    }

    /// Deep copy of the full in-memory history. Documented as expensive;
    /// callers on a hot path should prefer [`Self::get_updates`].
    pub fn get_history(&self) -> Vec<R> {
        self.data.lock().unwrap().history.clone()
    }

    pub fn flush(&self) -> Result<()> {
        self.data.lock().unwrap().writer.force_flush()
    }

    /// Ad-hoc complete snapshot of in-memory history to `path`, independent
    /// of the configured writer's own segment/flush state.
    pub fn save_to_csv(&self, path: &str) -> Result<()> {
        let history = self.data.lock().unwrap().history.clone();
        let mut writer = csv::Writer::from_path(path)?;
        for record in &history {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Spawn the background I/O thread: connect, subscribe, and enter the
    /// event loop. Returns immediately; connection readiness is reported
    /// asynchronously through the connection callback.
    pub fn start(&mut self, symbols: Vec<String>, options: SubscriptionOptions) {
        self.started.store(true, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);

        let subscription = self.parser.build_subscription(R::CHANNEL, &symbols, &options);
        let data = Arc::clone(&self.data);
        let callbacks = Arc::clone(&self.callbacks);
        let connected = Arc::clone(&self.connected);
        let running = Arc::clone(&self.running);
        let stop_requested = Arc::clone(&self.stop_requested);
        let update_callback = self.update_callback.take();
        let mut validator = self.validator.take();
        let parser = self.parser;

        running.store(true, Ordering::SeqCst);

        let handle = std::thread::spawn(move || {
            let mut session = match WsSession::connect(KRAKEN_WS_V2_URL, &subscription) {
                Ok(session) => session,
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    report_error(&callbacks, IngestError::TransportMsg(e.to_string()));
                    report_connection(&callbacks, ConnectionEvent::Error(e.to_string()));
                    return;
                }
            };

            connected.store(true, Ordering::SeqCst);
            report_connection(&callbacks, ConnectionEvent::Connected);

            let should_stop = || stop_requested.load(Ordering::SeqCst);

            session.run(
                &should_stop,
                |payload| {
                    let mut on_record = |record: R| {
                        let outcome = validator.as_mut().map(|v| v(&record)).unwrap_or(ValidationOutcome::Ok);
                        match outcome {
                            ValidationOutcome::Fatal(msg) => {
                                report_error(&callbacks, IngestError::State(msg));
                                running.store(false, Ordering::SeqCst);
                                return;
                            }
                            ValidationOutcome::Warning(msg) => {
                                warn!(symbol = record.symbol(), "{msg}");
                                report_error(&callbacks, IngestError::State(msg));
                            }
                            ValidationOutcome::Ok => {}
                        }

                        if let Some(cb) = &update_callback {
                            cb(&record);
                        }

                        let mut data = data.lock().unwrap();
                        data.history.push(record.clone());
                        data.pending.push(record.clone());
                        let flush_count_before = data.writer.flush_count();
                        if let Err(e) = data.writer.ingest(record, Utc::now()) {
                            report_error(&callbacks, e);
                        }
                        // A periodic flush just drained the writer's own
                        // buffer; drain history/pending in step so a
                        // callback-driven caller who never polls
                        // get_updates doesn't grow these unboundedly
                        // (§4.5, Testable Property 6).
                        if data.writer.flush_count() != flush_count_before {
                            data.history.clear();
                            data.pending.clear();
                        }
                    };
                    let mut on_status = |event: StatusEvent| match event {
                        StatusEvent::ParseError(msg) => report_error(&callbacks, IngestError::Protocol(msg)),
                        StatusEvent::ChecksumMismatch { symbol, expected, computed } => report_error(
                            &callbacks,
                            IngestError::State(format!("{symbol}: checksum mismatch expected {expected} computed {computed}")),
                        ),
                        StatusEvent::Subscribed { channel, symbol } => {
                            info!(channel, symbol, "subscription acknowledged");
                        }
                        StatusEvent::Heartbeat => {}
                    };
                    dispatch_payload::<R>(&parser, payload, &mut on_record, &mut on_status);
                },
                |event| match event {
                    SessionEvent::Closed => {
                        connected.store(false, Ordering::SeqCst);
                        running.store(false, Ordering::SeqCst);
                        report_connection(&callbacks, ConnectionEvent::Disconnected);
                    }
                    SessionEvent::Error(msg) => {
                        connected.store(false, Ordering::SeqCst);
                        running.store(false, Ordering::SeqCst);
                        report_error(&callbacks, IngestError::TransportMsg(msg.clone()));
                        report_connection(&callbacks, ConnectionEvent::Error(msg));
                    }
                },
            );

            let mut data = data.lock().unwrap();
            if let Err(e) = data.writer.force_flush() {
                error!(error = %e, "final flush on session exit failed");
            }
        });

        self.thread = Some(handle);
    }

    /// Request the session to close, join the I/O thread (bounded by
    /// [`JOIN_TIMEOUT`]; per §5 the thread is never force-killed), and
    /// drain residual buffers via a final flush. Idempotent.
    pub fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);

        if let Some(handle) = self.thread.take() {
            let start = std::time::Instant::now();
            while !handle.is_finished() && start.elapsed() < JOIN_TIMEOUT {
                std::thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("I/O thread did not join within the bound; not force-killed (implementation-defined)");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        if let Err(e) = self.flush() {
            error!(error = %e, "final flush on stop() failed");
        }
    }
}

fn report_error<R>(callbacks: &Arc<Mutex<Callbacks<R>>>, err: IngestError) {
    if let Some(cb) = &callbacks.lock().unwrap().error {
        cb(err);
    }
}

fn report_connection<R>(callbacks: &Arc<Mutex<Callbacks<R>>>, event: ConnectionEvent) {
    if let Some(cb) = &callbacks.lock().unwrap().connection {
        cb(event);
    }
}

/// Dispatch one payload to `on_record` (filtered to this channel's record
/// type via [`Decoded::from_any`]) and `on_status`, via the parser's
/// generic [`AnyRecord`]-tagged sink.
fn dispatch_payload<R: Decoded>(
    parser: &ParserKind,
    payload: &str,
    on_record: &mut dyn FnMut(R),
    on_status: &mut dyn FnMut(StatusEvent),
) {
    let mut route_record = |any: AnyRecord| {
        if let Some(record) = R::from_any(any) {
            on_record(record);
        }
    };
    let mut sink = ClosureSink { on_record: &mut route_record, on_status };
    parser.parse_message(payload, &mut sink);
}
