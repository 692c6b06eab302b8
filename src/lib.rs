pub mod book;
pub mod checksum;
pub mod client;
pub mod cli;
pub mod credentials;
pub mod error;
pub mod flush;
pub mod model;
pub mod protocol;
pub mod sampling;
pub mod writer;
pub mod ws_session;

pub use book::{L2Book, L3Book};
pub use client::{
    ClientWriter, ConnectionEvent, Decoded, IngestClient, RecordSink, RoutedWriter, SingleWriter,
    ValidationOutcome,
};
pub use writer::MultiWriter;
pub use error::{IngestError, Result};
pub use model::{
    L3Event, Level3Order, Level3Record, OrderBookRecord, PriceLevel, Record, RecordKind, StatusEvent,
    TickerRecord,
};
pub use protocol::{MessageSink, ParserKind, SubscriptionOptions};
pub use ws_session::{SessionEvent, WsSession, KRAKEN_WS_V2_URL};

/// Initialize logging for the library.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();
}
