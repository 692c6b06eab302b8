//! Parser capability (C1): decode one framed Kraken WS v2 JSON payload into
//! typed decoded events. Modeled as a `ParserKind` enum rather than a trait
//! object — both variants in this implementation share one decode routine,
//! but a genuine second backend (e.g. `simd-json`) could dispatch here
//! without touching C5 (see DESIGN.md).

use crate::model::{L3Event, Level3Order, Level3Record, OrderBookRecord, PriceLevel, RecordKind, StatusEvent, TickerRecord};
use chrono::Utc;
use serde_json::Value;

/// Which decoding backend produced a given [`ParserKind::parse_message`]
/// call. Both variants conform to the same contract today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// High-performance SIMD-oriented backend.
    Simd,
    /// Forgiving reflective backend (tolerates minor schema drift).
    Reflective,
}

impl ParserKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParserKind::Simd => "simd",
            ParserKind::Reflective => "reflective",
        }
    }

    /// Build a `{"method":"subscribe",...}` payload for `channel`.
    pub fn build_subscription(&self, channel: &str, symbols: &[String], options: &SubscriptionOptions) -> String {
        let mut params = serde_json::Map::new();
        params.insert("channel".into(), Value::String(channel.into()));
        params.insert("symbol".into(), Value::Array(symbols.iter().cloned().map(Value::String).collect()));
        if let Some(depth) = options.depth {
            params.insert("depth".into(), Value::Number(depth.into()));
        }
        if options.snapshot {
            params.insert("snapshot".into(), Value::Bool(true));
        }
        if let Some(token) = &options.token {
            params.insert("token".into(), Value::String(token.clone()));
        }
        let payload = serde_json::json!({
            "method": "subscribe",
            "params": Value::Object(params),
        });
        payload.to_string()
    }

    /// Dispatch one payload into the appropriate sink callback(s). Never
    /// panics; unparseable or incomplete payloads are reported through
    /// `sink.on_status` and otherwise skipped.
    pub fn parse_message(&self, payload: &str, sink: &mut dyn MessageSink) {
        let value: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                sink.on_status(StatusEvent::ParseError(format!("invalid JSON: {e}")));
                return;
            }
        };

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            if method == "subscribe" {
                let channel = value.pointer("/result/channel").and_then(Value::as_str).map(String::from);
                let symbol = value.pointer("/result/symbol").and_then(Value::as_str).map(String::from);
                if value.get("success").and_then(Value::as_bool) == Some(false) {
                    let reason = value.get("error").and_then(Value::as_str).unwrap_or("subscribe rejected");
                    sink.on_status(StatusEvent::ParseError(reason.to_string()));
                } else {
                    sink.on_status(StatusEvent::Subscribed { channel: channel.unwrap_or_default(), symbol });
                }
            }
            return;
        }

        let Some(channel) = value.get("channel").and_then(Value::as_str) else {
            sink.on_status(StatusEvent::ParseError("payload missing channel/method".into()));
            return;
        };

        if channel == "heartbeat" {
            sink.on_status(StatusEvent::Heartbeat);
            return;
        }

        let kind = match value.get("type").and_then(Value::as_str) {
            Some("snapshot") => RecordKind::Snapshot,
            Some("update") => RecordKind::Update,
            _ => {
                sink.on_status(StatusEvent::ParseError(format!("{channel}: missing/unknown type")));
                return;
            }
        };

        let Some(data) = value.get("data").and_then(Value::as_array) else {
            sink.on_status(StatusEvent::ParseError(format!("{channel}: missing data array")));
            return;
        };

        match channel {
            "ticker" => {
                for entry in data {
                    match parse_ticker_entry(entry, kind) {
                        Ok(record) => sink.on_ticker(record),
                        Err(e) => sink.on_status(StatusEvent::ParseError(e)),
                    }
                }
            }
            "book" => {
                for entry in data {
                    match parse_book_entry(entry, kind) {
                        Ok(record) => sink.on_book(record),
                        Err(e) => sink.on_status(StatusEvent::ParseError(e)),
                    }
                }
            }
            "level3" => {
                for entry in data {
                    match parse_level3_entry(entry, kind) {
                        Ok(record) => sink.on_level3(record),
                        Err(e) => sink.on_status(StatusEvent::ParseError(e)),
                    }
                }
            }
            other => sink.on_status(StatusEvent::ParseError(format!("unknown channel {other}"))),
        }
    }
}

/// Depth/snapshot/token knobs for [`ParserKind::build_subscription`].
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    pub depth: Option<u32>,
    pub snapshot: bool,
    pub token: Option<String>,
}

/// Exactly one of these is invoked per decoded inner record.
pub trait MessageSink {
    fn on_ticker(&mut self, record: TickerRecord);
    fn on_book(&mut self, record: OrderBookRecord);
    fn on_level3(&mut self, record: Level3Record);
    fn on_status(&mut self, event: StatusEvent);
}

/// One decoded record, tagged by channel. Lets a caller that only cares
/// about a single record type (the ingestion client, generic over `R`)
/// plug a closure into [`MessageSink`] without writing one inherent
/// `MessageSink` impl per record type.
pub enum AnyRecord {
    Ticker(TickerRecord),
    Book(OrderBookRecord),
    Level3(Level3Record),
}

/// Adapts two closures to the [`MessageSink`] trait: every decoded record
/// funnels through `on_record` tagged by variant, every non-data event
/// through `on_status`.
pub struct ClosureSink<'a> {
    pub on_record: &'a mut dyn FnMut(AnyRecord),
    pub on_status: &'a mut dyn FnMut(StatusEvent),
}

impl MessageSink for ClosureSink<'_> {
    fn on_ticker(&mut self, record: TickerRecord) {
        (self.on_record)(AnyRecord::Ticker(record));
    }
    fn on_book(&mut self, record: OrderBookRecord) {
        (self.on_record)(AnyRecord::Book(record));
    }
    fn on_level3(&mut self, record: Level3Record) {
        (self.on_record)(AnyRecord::Level3(record));
    }
    fn on_status(&mut self, event: StatusEvent) {
        (self.on_status)(event);
    }
}

fn f64_field(entry: &Value, field: &str) -> f64 {
    entry.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

fn string_field(entry: &Value, field: &str) -> Option<String> {
    entry.get(field).and_then(Value::as_str).map(String::from)
}

fn parse_ticker_entry(entry: &Value, kind: RecordKind) -> std::result::Result<TickerRecord, String> {
    let symbol = string_field(entry, "symbol").ok_or("ticker entry missing symbol")?;
    Ok(TickerRecord {
        timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        symbol,
        kind,
        bid: f64_field(entry, "bid"),
        bid_qty: f64_field(entry, "bid_qty"),
        ask: f64_field(entry, "ask"),
        ask_qty: f64_field(entry, "ask_qty"),
        last: f64_field(entry, "last"),
        volume: f64_field(entry, "volume"),
        vwap: f64_field(entry, "vwap"),
        low: f64_field(entry, "low"),
        high: f64_field(entry, "high"),
        change: f64_field(entry, "change"),
        change_pct: f64_field(entry, "change_pct"),
    })
}

fn parse_levels(entry: &Value, field: &str) -> std::result::Result<Vec<PriceLevel>, String> {
    let arr = entry.get(field).and_then(Value::as_array).ok_or_else(|| format!("book entry missing {field}"))?;
    Ok(arr
        .iter()
        .map(|lvl| PriceLevel { price: f64_field(lvl, "price"), qty: f64_field(lvl, "qty") })
        .collect())
}

fn parse_book_entry(entry: &Value, kind: RecordKind) -> std::result::Result<OrderBookRecord, String> {
    let symbol = string_field(entry, "symbol").ok_or("book entry missing symbol")?;
    let bids = parse_levels(entry, "bids")?;
    let asks = parse_levels(entry, "asks")?;
    let checksum = entry.get("checksum").and_then(Value::as_u64).unwrap_or(0) as u32;
    Ok(OrderBookRecord {
        timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        symbol,
        kind,
        bids,
        asks,
        checksum,
    })
}

fn parse_l3_orders(entry: &Value, field: &str, is_snapshot: bool) -> std::result::Result<Vec<Level3Order>, String> {
    let arr = entry.get(field).and_then(Value::as_array).ok_or_else(|| format!("level3 entry missing {field}"))?;
    arr.iter()
        .map(|o| {
            let order_id = string_field(o, "order_id").ok_or("level3 order missing order_id")?;
            let event = if is_snapshot {
                None
            } else {
                match string_field(o, "event").as_deref() {
                    Some("add") => Some(L3Event::Add),
                    Some("modify") => Some(L3Event::Modify),
                    Some("delete") => Some(L3Event::Delete),
                    _ => return Err(format!("level3 order {order_id} missing/unknown event")),
                }
            };
            Ok(Level3Order {
                event,
                order_id,
                limit_price: f64_field(o, "limit_price"),
                order_qty: f64_field(o, "order_qty"),
                timestamp: string_field(o, "timestamp").unwrap_or_default(),
            })
        })
        .collect()
}

fn parse_level3_entry(entry: &Value, kind: RecordKind) -> std::result::Result<Level3Record, String> {
    let symbol = string_field(entry, "symbol").ok_or("level3 entry missing symbol")?;
    let is_snapshot = kind == RecordKind::Snapshot;
    let bids = parse_l3_orders(entry, "bids", is_snapshot)?;
    let asks = parse_l3_orders(entry, "asks", is_snapshot)?;
    let checksum = entry.get("checksum").and_then(Value::as_u64).unwrap_or(0) as u32;
    Ok(Level3Record {
        timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        symbol,
        kind,
        bids,
        asks,
        checksum,
    })
}
