//! L2/L3 JSONL writers: one JSON object per line, no header, full
//! numeric precision (`serde_json` encodes `f64` losslessly).
//!
//! Wire shape per line: `{timestamp, channel, type, data:{symbol, ...}}`.
//! The in-memory [`OrderBookRecord`]/[`Level3Record`] structs are flat
//! (easier to build and to apply to book state); serialization nests
//! them into the wire envelope here.

use crate::error::Result;
use crate::flush::Flushable;
use crate::model::{Level3Record, OrderBookRecord, LEVEL3_RECORD_SIZE_ESTIMATE, ORDER_BOOK_RECORD_SIZE_ESTIMATE};
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;

fn book_envelope(record: &OrderBookRecord) -> serde_json::Value {
    json!({
        "timestamp": record.timestamp,
        "channel": "book",
        "type": record.kind.as_str(),
        "data": {
            "symbol": record.symbol,
            "bids": record.bids.iter().map(|l| json!([l.price, l.qty])).collect::<Vec<_>>(),
            "asks": record.asks.iter().map(|l| json!([l.price, l.qty])).collect::<Vec<_>>(),
            "checksum": record.checksum,
        }
    })
}

fn level3_envelope(record: &Level3Record) -> serde_json::Value {
    json!({
        "timestamp": record.timestamp,
        "channel": "level3",
        "type": record.kind.as_str(),
        "data": {
            "symbol": record.symbol,
            "bids": record.bids,
            "asks": record.asks,
            "checksum": record.checksum,
        }
    })
}

macro_rules! jsonl_writer {
    ($name:ident, $record:ty, $to_envelope:path, $size_estimate:expr) => {
        pub struct $name {
            buffer: Vec<$record>,
            filename: String,
            file: Option<File>,
        }

        impl $name {
            pub fn new(filename: impl Into<String>) -> Self {
                Self { buffer: Vec::with_capacity(1000), filename: filename.into(), file: None }
            }

            pub fn push(&mut self, record: $record) {
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
                Ok(())
            }
        }

        impl Flushable for $name {
            fn buffer_len(&self) -> usize {
                self.buffer.len()
            }

            fn record_size_estimate(&self) -> usize {
                $size_estimate
            }

            fn file_extension(&self) -> &str {
                ".jsonl"
            }

            fn perform_flush(&mut self) -> Result<()> {
                if self.file.is_none() {
                    self.open(true)?;
                }
                let file = self.file.as_mut().expect("opened above");
                for record in &self.buffer {
                    let envelope = $to_envelope(record);
                    let line = serde_json::to_string(&envelope)?;
                    writeln!(file, "{line}")?;
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
    };
}

jsonl_writer!(BookJsonlWriter, OrderBookRecord, book_envelope, ORDER_BOOK_RECORD_SIZE_ESTIMATE);
jsonl_writer!(Level3JsonlWriter, Level3Record, level3_envelope, LEVEL3_RECORD_SIZE_ESTIMATE);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PriceLevel, RecordKind};

    #[test]
    fn book_jsonl_writer_emits_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.jsonl");
        let mut writer = BookJsonlWriter::new(path.to_str().unwrap());

        writer.push(OrderBookRecord {
            timestamp: "2025-11-12T10:00:00Z".into(),
            symbol: "BTC/USD".into(),
            kind: RecordKind::Snapshot,
            bids: vec![PriceLevel { price: 100.0, qty: 1.0 }],
            asks: vec![PriceLevel { price: 101.0, qty: 0.5 }],
            checksum: 12345,
        });
        writer.perform_flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["channel"], "book");
        assert_eq!(parsed["type"], "snapshot");
        assert_eq!(parsed["data"]["symbol"], "BTC/USD");
        assert_eq!(parsed["data"]["checksum"], 12345);
        assert_eq!(parsed["data"]["bids"][0][0], 100.0);
    }

    #[test]
    fn level3_jsonl_writer_nests_orders_under_data() {
        use crate::model::{L3Event, Level3Order};
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l3.jsonl");
        let mut writer = Level3JsonlWriter::new(path.to_str().unwrap());

        writer.push(Level3Record {
            timestamp: "t".into(),
            symbol: "ETH/USD".into(),
            kind: RecordKind::Update,
            bids: vec![Level3Order {
                event: Some(L3Event::Add),
                order_id: "A".into(),
                limit_price: 100.0,
                order_qty: 1.0,
                timestamp: "t".into(),
            }],
            asks: vec![],
            checksum: 7,
        });
        writer.perform_flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["data"]["bids"][0]["order_id"], "A");
        assert_eq!(parsed["data"]["bids"][0]["event"], "add");
    }

    #[test]
    fn segment_transition_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path1 = dir.path().join("b.1.jsonl");
        let path2 = dir.path().join("b.2.jsonl");

        let mut writer = BookJsonlWriter::new(path1.to_str().unwrap());
        writer.push(OrderBookRecord {
            timestamp: "t".into(),
            symbol: "X".into(),
            kind: RecordKind::Update,
            bids: vec![],
            asks: vec![],
            checksum: 0,
        });
        writer.perform_flush().unwrap();
        writer.perform_segment_transition(path2.to_str().unwrap()).unwrap();
        writer.push(OrderBookRecord {
            timestamp: "t2".into(),
            symbol: "X".into(),
            kind: RecordKind::Update,
            bids: vec![],
            asks: vec![],
            checksum: 0,
        });
        writer.perform_flush().unwrap();

        let content = std::fs::read_to_string(&path2).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
