//! Decoded record types shared by the parser, writers, client and book
//! state. These are the types that cross the C1 -> C5 -> C3/C6 boundary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Snapshot,
    Update,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Snapshot => "snapshot",
            RecordKind::Update => "update",
        }
    }
}

/// Level 1 ticker record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerRecord {
    pub timestamp: String,
    pub symbol: String,
    pub kind: RecordKind,
    pub bid: f64,
    pub bid_qty: f64,
    pub ask: f64,
    pub ask_qty: f64,
    pub last: f64,
    pub volume: f64,
    pub vwap: f64,
    pub low: f64,
    pub high: f64,
    pub change: f64,
    pub change_pct: f64,
}

pub const TICKER_RECORD_SIZE_ESTIMATE: usize = 160;

/// A single L2 price level. A quantity of 0.0 in an update means "remove
/// this level"; a strictly positive quantity in a snapshot or post-update
/// means "set level".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: f64,
}

/// Level 2 aggregated order book record (snapshot or delta).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookRecord {
    pub timestamp: String,
    pub symbol: String,
    pub kind: RecordKind,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub checksum: u32,
}

pub const ORDER_BOOK_RECORD_SIZE_ESTIMATE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L3Event {
    Add,
    Modify,
    Delete,
}

/// A single L3 order. `event` is omitted on snapshot entries (they carry
/// the full set of standing orders, not a delta).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level3Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<L3Event>,
    pub order_id: String,
    pub limit_price: f64,
    pub order_qty: f64,
    pub timestamp: String,
}

/// Level 3 individual-order book record (snapshot or delta).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level3Record {
    pub timestamp: String,
    pub symbol: String,
    pub kind: RecordKind,
    pub bids: Vec<Level3Order>,
    pub asks: Vec<Level3Order>,
    pub checksum: u32,
}

pub const LEVEL3_RECORD_SIZE_ESTIMATE: usize = 320;

/// Non-fatal status events surfaced by the parser and the book state
/// engine: subscription acks, heartbeats, and per-payload parse/state
/// warnings that do not abort ingestion.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    Subscribed { channel: String, symbol: Option<String> },
    Heartbeat,
    ParseError(String),
    ChecksumMismatch { symbol: String, expected: u32, computed: u32 },
}

/// A decoded record of any of the three channels, as fanned out by the
/// ingestion client to its writer/history/callback.
#[derive(Debug, Clone)]
pub enum Record {
    Ticker(TickerRecord),
    Book(OrderBookRecord),
    Level3(Level3Record),
}

impl Record {
    pub fn symbol(&self) -> &str {
        match self {
            Record::Ticker(r) => &r.symbol,
            Record::Book(r) => &r.symbol,
            Record::Level3(r) => &r.symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RecordKind::Snapshot).unwrap(), "\"snapshot\"");
        assert_eq!(serde_json::to_string(&RecordKind::Update).unwrap(), "\"update\"");
    }

    #[test]
    fn level3_order_omits_event_when_none() {
        let order = Level3Order {
            event: None,
            order_id: "A".into(),
            limit_price: 100.0,
            order_qty: 1.0,
            timestamp: "2025-11-12T10:00:00Z".into(),
        };
        let json = serde_json::to_string(&order).unwrap();
        assert!(!json.contains("event"));
    }

    #[test]
    fn level3_order_includes_event_when_present() {
        let order = Level3Order {
            event: Some(L3Event::Add),
            order_id: "B".into(),
            limit_price: 100.0,
            order_qty: 0.5,
            timestamp: "2025-11-12T10:00:00Z".into(),
        };
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"event\":\"add\""));
    }
}
