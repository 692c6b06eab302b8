//! L2 aggregated order-book state. One [`L2Book`] is maintained per
//! symbol by the caller (the ingestion client keys a `HashMap<String,
//! L2Book>`); this type itself only knows about a single book.

use super::PriceKey;
use crate::checksum::book_checksum;
use crate::error::{IngestError, Result};
use crate::model::{OrderBookRecord, PriceLevel};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct L2Book {
    /// Ascending by price; read back reversed for descending (best-first).
    bids: BTreeMap<PriceKey, f64>,
    /// Ascending by price, already best-first.
    asks: BTreeMap<PriceKey, f64>,
    last_applied_checksum: u32,
}

impl L2Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both sides wholesale and record the checksum. The caller is
    /// expected to have already verified `record.checksum` against
    /// [`book_checksum`] of the snapshot contents if strict mode is on;
    /// this method itself does not validate a snapshot's checksum (there is
    /// no prior state to desync from).
    pub fn apply_snapshot(&mut self, record: &OrderBookRecord) {
        self.bids.clear();
        self.asks.clear();
        for level in &record.bids {
            self.bids.insert(PriceKey(level.price), level.qty);
        }
        for level in &record.asks {
            self.asks.insert(PriceKey(level.price), level.qty);
        }
        self.last_applied_checksum = record.checksum;
    }

    /// Apply a delta: qty 0 removes the price key, otherwise sets it. Then
    /// recompute the checksum and compare against `record.checksum`;
    /// mismatch is a warning unless `strict`, in which case it is an error.
    pub fn apply_update(&mut self, record: &OrderBookRecord, strict: bool) -> Result<Option<ChecksumMismatch>> {
        apply_levels(&mut self.bids, &record.bids);
        apply_levels(&mut self.asks, &record.asks);

        let computed = self.checksum();
        self.last_applied_checksum = record.checksum;

        if computed != record.checksum {
            let mismatch = ChecksumMismatch { symbol: record.symbol.clone(), expected: record.checksum, computed };
            if strict {
                return Err(IngestError::State(format!(
                    "checksum mismatch for {}: expected {}, computed {}",
                    record.symbol, record.checksum, computed
                )));
            }
            return Ok(Some(mismatch));
        }
        Ok(None)
    }

    /// Recompute the checksum over the top [`crate::checksum::CHECKSUM_DEPTH`]
    /// levels per side, per Kraken's published algorithm.
    pub fn checksum(&self) -> u32 {
        let asks: Vec<(f64, f64)> = self.asks.iter().map(|(k, q)| (k.0, *q)).collect();
        let bids: Vec<(f64, f64)> = self.bids.iter().rev().map(|(k, q)| (k.0, *q)).collect();
        book_checksum(&asks, &bids)
    }

    pub fn best_bid(&self) -> Option<(f64, f64)> {
        self.bids.iter().next_back().map(|(k, q)| (k.0, *q))
    }

    pub fn best_ask(&self) -> Option<(f64, f64)> {
        self.asks.iter().next().map(|(k, q)| (k.0, *q))
    }

    /// Descending bids, ascending asks, as a sanity check for Testable
    /// Property 3 (`best_bid < best_ask`, correct side ordering).
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    pub fn bid_levels(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.bids.iter().rev().map(|(k, q)| (k.0, *q))
    }

    pub fn ask_levels(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.asks.iter().map(|(k, q)| (k.0, *q))
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Aggregated quantity within `bps` basis points of mid, per side.
    pub fn depth_within_bps(&self, bps: f64) -> Option<DepthWindow> {
        let mid = self.mid_price()?;
        let band = mid * bps / 10_000.0;
        let bid_vol: f64 = self.bid_levels().filter(|(p, _)| *p >= mid - band).map(|(_, q)| q).sum();
        let ask_vol: f64 = self.ask_levels().filter(|(p, _)| *p <= mid + band).map(|(_, q)| q).sum();
        Some(DepthWindow { bid_vol, ask_vol })
    }

    pub fn last_applied_checksum(&self) -> u32 {
        self.last_applied_checksum
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepthWindow {
    pub bid_vol: f64,
    pub ask_vol: f64,
}

#[derive(Debug, Clone)]
pub struct ChecksumMismatch {
    pub symbol: String,
    pub expected: u32,
    pub computed: u32,
}

fn apply_levels(side: &mut BTreeMap<PriceKey, f64>, levels: &[PriceLevel]) {
    for level in levels {
        let key = PriceKey(level.price);
        if level.qty == 0.0 {
            side.remove(&key);
        } else {
            side.insert(key, level.qty);
        }
    }
}
