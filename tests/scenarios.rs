//! End-to-end scenario harness (S1-S6): exercises the flush/segment engine
//! and book state through the crate's public API, against real files on
//! disk rather than mocks, the way a multi-module pipeline with real I/O
//! is usually driven at the crate boundary.

use chrono::{DateTime, Utc};
use kraken_ingest::book::l2::L2Book;
use kraken_ingest::book::l3::{L3Book, Side};
use kraken_ingest::flush::{FlushSegmentState, Flushable, SegmentMode};
use kraken_ingest::model::{L3Event, Level3Order, Level3Record, OrderBookRecord, PriceLevel, RecordKind};
use kraken_ingest::writer::TickerCsvWriter;
use kraken_ingest::TickerRecord;
use std::io::BufRead;
use std::time::Duration;

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn sample_ticker(symbol: &str) -> TickerRecord {
    TickerRecord {
        timestamp: "2025-11-12T10:00:00.000Z".into(),
        symbol: symbol.into(),
        kind: RecordKind::Update,
        bid: 100.0,
        bid_qty: 1.0,
        ask: 101.0,
        ask_qty: 1.0,
        last: 100.5,
        volume: 10.0,
        vwap: 100.2,
        low: 99.0,
        high: 102.0,
        change: 0.5,
        change_pct: 0.5,
    }
}

/// S1: flush_interval=1s, memory_threshold=0, segment_mode=none. Three
/// records injected; after the interval elapses, a single flush drains a
/// header plus all three rows.
#[test]
fn s1_l1_flush_trigger_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.csv");
    let mut writer = TickerCsvWriter::new(path.to_str().unwrap());
    let mut engine = FlushSegmentState::new(path.to_str().unwrap(), 1, 0, SegmentMode::None);

    for _ in 0..3 {
        engine.begin_record(&mut writer, Utc::now()).unwrap();
        writer.push(sample_ticker("BTC/USD"));
        engine.end_record(&mut writer).unwrap();
    }
    assert_eq!(engine.flush_count(), 0, "interval has not elapsed yet");

    std::thread::sleep(Duration::from_millis(1100));
    engine.begin_record(&mut writer, Utc::now()).unwrap();
    writer.push(sample_ticker("BTC/USD"));
    engine.end_record(&mut writer).unwrap();

    assert_eq!(engine.flush_count(), 1);
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 5, "header + 4 rows (3 buffered + 1 after the interval)");
}

/// S2: hourly segmentation rotates the output file exactly at the UTC hour
/// boundary, truncating the new segment rather than appending.
#[test]
fn s2_l1_segment_rotation_hourly() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("t.csv");
    let mut writer = TickerCsvWriter::new(base.to_str().unwrap());
    let mut engine = FlushSegmentState::new(base.to_str().unwrap(), 1, 0, SegmentMode::Hourly);

    engine.begin_record(&mut writer, ts("2025-11-12T10:59:59.5Z")).unwrap();
    writer.push(sample_ticker("BTC/USD"));
    engine.end_record(&mut writer).unwrap();

    engine.begin_record(&mut writer, ts("2025-11-12T11:00:00.2Z")).unwrap();
    writer.push(sample_ticker("BTC/USD"));
    engine.end_record(&mut writer).unwrap();
    // Mirrors the client's final drain on stop(): the 11:00 row is still
    // sitting in the (now current) segment's buffer since neither trigger
    // has fired for it yet.
    engine.force_flush(&mut writer).unwrap();

    let path_10 = dir.path().join("t.20251112_10.csv");
    let path_11 = dir.path().join("t.20251112_11.csv");

    let rows_10: Vec<String> = std::io::BufReader::new(std::fs::File::open(&path_10).unwrap()).lines().map(|l| l.unwrap()).collect();
    let rows_11: Vec<String> = std::io::BufReader::new(std::fs::File::open(&path_11).unwrap()).lines().map(|l| l.unwrap()).collect();

    assert_eq!(rows_10.len(), 2, "header + 1 row");
    assert_eq!(rows_11.len(), 2, "header + 1 row, truncated fresh");
    assert_eq!(engine.segment_count(), 2);
}

/// S3: an L2 snapshot followed by an update that removes one level and adds
/// another, with no checksum warning when the update's checksum matches.
#[test]
fn s3_l2_snapshot_then_update() {
    let mut book = L2Book::new();
    book.apply_snapshot(&OrderBookRecord {
        timestamp: "t".into(),
        symbol: "BTC/USD".into(),
        kind: RecordKind::Snapshot,
        bids: vec![PriceLevel { price: 100.0, qty: 1.0 }, PriceLevel { price: 99.0, qty: 2.0 }],
        asks: vec![PriceLevel { price: 101.0, qty: 0.5 }],
        checksum: 0,
    });

    let recomputed_after_update = {
        // Compute what the checksum *would* be after applying the delta, by
        // applying it to a scratch copy first (mirrors what a real feed
        // sends: the post-update checksum).
        let mut scratch = L2Book::new();
        scratch.apply_snapshot(&OrderBookRecord {
            timestamp: "t".into(),
            symbol: "BTC/USD".into(),
            kind: RecordKind::Snapshot,
            bids: vec![PriceLevel { price: 99.0, qty: 2.0 }, PriceLevel { price: 98.0, qty: 3.0 }],
            asks: vec![PriceLevel { price: 101.0, qty: 0.5 }],
            checksum: 0,
        });
        scratch.checksum()
    };

    let mismatch = book
        .apply_update(
            &OrderBookRecord {
                timestamp: "t".into(),
                symbol: "BTC/USD".into(),
                kind: RecordKind::Update,
                bids: vec![PriceLevel { price: 100.0, qty: 0.0 }, PriceLevel { price: 98.0, qty: 3.0 }],
                asks: vec![],
                checksum: recomputed_after_update,
            },
            false,
        )
        .unwrap();

    assert!(mismatch.is_none());
    assert_eq!(book.bid_levels().collect::<Vec<_>>(), vec![(99.0, 2.0), (98.0, 3.0)]);
    assert_eq!(book.ask_levels().collect::<Vec<_>>(), vec![(101.0, 0.5)]);
}

fn l3_order(id: &str, event: Option<L3Event>, price: f64, qty: f64) -> Level3Order {
    Level3Order { event, order_id: id.into(), limit_price: price, order_qty: qty, timestamp: "t".into() }
}

/// S4: snapshot with one standing bid, then add/modify/delete in sequence.
/// Final state has exactly the modified original order at that price level.
#[test]
fn s4_l3_add_modify_delete() {
    let mut book = L3Book::new();
    book.apply_snapshot(&Level3Record {
        timestamp: "t".into(),
        symbol: "BTC/USD".into(),
        kind: RecordKind::Snapshot,
        bids: vec![l3_order("A", None, 100.0, 1.0)],
        asks: vec![],
        checksum: 0,
    });

    let update = |bids: Vec<Level3Order>, checksum: u32| Level3Record {
        timestamp: "t".into(),
        symbol: "BTC/USD".into(),
        kind: RecordKind::Update,
        bids,
        asks: vec![],
        checksum,
    };

    book.apply_update(&update(vec![l3_order("B", Some(L3Event::Add), 100.0, 0.5)], book.checksum())).unwrap();
    book.apply_update(&update(vec![l3_order("A", Some(L3Event::Modify), 100.0, 0.3)], book.checksum())).unwrap();
    let checksum_before_delete = book.checksum();
    book.apply_update(&update(vec![l3_order("B", Some(L3Event::Delete), 100.0, 0.0)], checksum_before_delete)).unwrap();

    assert_eq!(book.order_ids_at(Side::Bid, 100.0), vec!["A".to_string()]);
    assert_eq!(book.orders_at_best(Side::Bid), 1);
    assert_eq!(book.avg_order_size(Side::Bid), 0.3);
}

/// S5: a checksum mismatch produces exactly one warning; state is still
/// updated (non-strict is the default) and the event itself never touches
/// the flush engine.
#[test]
fn s5_l2_checksum_mismatch_is_non_fatal_warning() {
    let mut book = L2Book::new();
    book.apply_snapshot(&OrderBookRecord {
        timestamp: "t".into(),
        symbol: "BTC/USD".into(),
        kind: RecordKind::Snapshot,
        bids: vec![PriceLevel { price: 100.0, qty: 1.0 }],
        asks: vec![PriceLevel { price: 101.0, qty: 1.0 }],
        checksum: 0,
    });

    let mismatch = book
        .apply_update(
            &OrderBookRecord {
                timestamp: "t".into(),
                symbol: "BTC/USD".into(),
                kind: RecordKind::Update,
                bids: vec![PriceLevel { price: 100.0, qty: 2.0 }],
                asks: vec![],
                checksum: 999_999,
            },
            false,
        )
        .unwrap();

    assert!(mismatch.is_some());
    assert_eq!(book.best_bid(), Some((100.0, 2.0)), "state still applies despite the mismatch");
}

/// S6: the flush engine's size trigger keeps the writer's buffer bounded
/// regardless of how many records have already passed through it.
#[test]
fn s6_size_trigger_bounds_buffer_memory_regardless_of_volume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.csv");
    let mut writer = TickerCsvWriter::new(path.to_str().unwrap());
    // 5 records worth of estimated size triggers a flush.
    let mut engine = FlushSegmentState::new(path.to_str().unwrap(), 0, 5 * kraken_ingest::model::TICKER_RECORD_SIZE_ESTIMATE, SegmentMode::None);

    let mut max_buffer_len = 0;
    for _ in 0..2000 {
        engine.begin_record(&mut writer, Utc::now()).unwrap();
        writer.push(sample_ticker("BTC/USD"));
        engine.end_record(&mut writer).unwrap();
        max_buffer_len = max_buffer_len.max(writer.buffer_len());
    }

    assert!(max_buffer_len <= 5, "buffer must never grow past the size trigger regardless of total volume");
    assert!(engine.flush_count() >= 2000 / 5);
}
