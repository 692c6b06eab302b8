//! L3 individual-order book state: a dual index between `order_id` (how
//! updates address orders) and price level (how analytics reads them), per
//! order_id in bijection with exactly one side's price-bucket FIFO list.

use super::PriceKey;
use crate::checksum::book_checksum;
use crate::error::{IngestError, Result};
use crate::model::{L3Event, Level3Record};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

#[derive(Debug, Clone)]
struct OrderMeta {
    side: Side,
    price: f64,
    qty: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EventCounters {
    pub adds: u64,
    pub modifies: u64,
    pub deletes: u64,
}

#[derive(Debug, Default)]
pub struct L3Book {
    orders_by_id: HashMap<String, OrderMeta>,
    bids_by_price: BTreeMap<PriceKey, VecDeque<String>>,
    asks_by_price: BTreeMap<PriceKey, VecDeque<String>>,
    counters: EventCounters,
}

impl L3Book {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_snapshot(&mut self, record: &Level3Record) {
        self.orders_by_id.clear();
        self.bids_by_price.clear();
        self.asks_by_price.clear();

        for order in &record.bids {
            self.insert_at_tail(Side::Bid, order.order_id.clone(), order.limit_price, order.order_qty);
        }
        for order in &record.asks {
            self.insert_at_tail(Side::Ask, order.order_id.clone(), order.limit_price, order.order_qty);
        }
    }

    /// Apply a delta batch (add/modify/delete per order); recompute and
    /// compare the checksum afterwards. Unknown-id modify/delete and
    /// duplicate-id add are protocol-state errors (Testable Property 2),
    /// surfaced immediately rather than silently skipped.
    pub fn apply_update(&mut self, record: &Level3Record) -> Result<Option<ChecksumMismatch>> {
        for order in &record.bids {
            self.apply_one(Side::Bid, order)?;
        }
        for order in &record.asks {
            self.apply_one(Side::Ask, order)?;
        }

        let computed = self.checksum();
        if computed != record.checksum {
            return Ok(Some(ChecksumMismatch { symbol: record.symbol.clone(), expected: record.checksum, computed }));
        }
        Ok(None)
    }

    fn apply_one(&mut self, side: Side, order: &crate::model::Level3Order) -> Result<()> {
        match order.event {
            Some(L3Event::Add) => {
                if self.orders_by_id.contains_key(&order.order_id) {
                    return Err(IngestError::State(format!("add of already-present order_id {}", order.order_id)));
                }
                self.insert_at_tail(side, order.order_id.clone(), order.limit_price, order.order_qty);
                self.counters.adds += 1;
            }
            Some(L3Event::Modify) => {
                let meta = self
                    .orders_by_id
                    .get_mut(&order.order_id)
                    .ok_or_else(|| IngestError::State(format!("modify of unknown order_id {}", order.order_id)))?;
                meta.qty = order.order_qty;
                self.counters.modifies += 1;
            }
            Some(L3Event::Delete) => {
                self.remove(&order.order_id)?;
                self.counters.deletes += 1;
            }
            None => {
                return Err(IngestError::Protocol(format!("update order {} missing event", order.order_id)));
            }
        }
        Ok(())
    }

    fn insert_at_tail(&mut self, side: Side, order_id: String, price: f64, qty: f64) {
        let bucket = match side {
            Side::Bid => self.bids_by_price.entry(PriceKey(price)).or_default(),
            Side::Ask => self.asks_by_price.entry(PriceKey(price)).or_default(),
        };
        bucket.push_back(order_id.clone());
        self.orders_by_id.insert(order_id, OrderMeta { side, price, qty });
    }

    fn remove(&mut self, order_id: &str) -> Result<()> {
        let meta = self
            .orders_by_id
            .remove(order_id)
            .ok_or_else(|| IngestError::State(format!("delete of unknown order_id {order_id}")))?;
        let key = PriceKey(meta.price);
        let side_map = match meta.side {
            Side::Bid => &mut self.bids_by_price,
            Side::Ask => &mut self.asks_by_price,
        };
        if let Some(bucket) = side_map.get_mut(&key) {
            bucket.retain(|id| id != order_id);
            if bucket.is_empty() {
                side_map.remove(&key);
            }
        }
        Ok(())
    }

    pub fn checksum(&self) -> u32 {
        let asks: Vec<(f64, f64)> = self.side_levels(Side::Ask).collect();
        let bids: Vec<(f64, f64)> = self.side_levels(Side::Bid).collect();
        book_checksum(&asks, &bids)
    }

    /// Per-price aggregated (price, total qty) pairs, ask-ascending /
    /// bid-descending, for the checksum and depth queries.
    fn side_levels(&self, side: Side) -> Box<dyn Iterator<Item = (f64, f64)> + '_> {
        match side {
            Side::Ask => Box::new(self.asks_by_price.iter().map(|(k, ids)| (k.0, self.sum_qty(ids)))),
            Side::Bid => Box::new(self.bids_by_price.iter().rev().map(|(k, ids)| (k.0, self.sum_qty(ids)))),
        }
    }

    fn sum_qty(&self, ids: &VecDeque<String>) -> f64 {
        ids.iter().filter_map(|id| self.orders_by_id.get(id)).map(|m| m.qty).sum()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids_by_price.keys().next_back().map(|k| k.0)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks_by_price.keys().next().map(|k| k.0)
    }

    /// Aggregated quantity standing at the best bid price, across every
    /// order queued there.
    pub fn best_bid_qty(&self) -> Option<f64> {
        let (_, ids) = self.bids_by_price.iter().next_back()?;
        Some(self.sum_qty(ids))
    }

    pub fn best_ask_qty(&self) -> Option<f64> {
        let (_, ids) = self.asks_by_price.iter().next()?;
        Some(self.sum_qty(ids))
    }

    /// Per-price aggregated (price, total qty) pairs, best-first: bids
    /// descending, asks ascending.
    pub fn bid_levels(&self) -> Box<dyn Iterator<Item = (f64, f64)> + '_> {
        self.side_levels(Side::Bid)
    }

    pub fn ask_levels(&self) -> Box<dyn Iterator<Item = (f64, f64)> + '_> {
        self.side_levels(Side::Ask)
    }

    /// Order count at the best price on `side` (L3-only concept; proxy for
    /// queue depth at the top of book).
    pub fn orders_at_best(&self, side: Side) -> usize {
        match side {
            Side::Bid => self.bids_by_price.values().next_back().map(|b| b.len()).unwrap_or(0),
            Side::Ask => self.asks_by_price.values().next().map(|b| b.len()).unwrap_or(0),
        }
    }

    pub fn order_count(&self, side: Side) -> usize {
        self.orders_by_id.values().filter(|m| m.side == side).count()
    }

    pub fn avg_order_size(&self, side: Side) -> f64 {
        let sizes: Vec<f64> = self.orders_by_id.values().filter(|m| m.side == side).map(|m| m.qty).collect();
        if sizes.is_empty() {
            0.0
        } else {
            sizes.iter().sum::<f64>() / sizes.len() as f64
        }
    }

    /// Order ids at `price` in FIFO arrival order, for Testable Property 8.
    pub fn order_ids_at(&self, side: Side, price: f64) -> Vec<String> {
        let map = match side {
            Side::Bid => &self.bids_by_price,
            Side::Ask => &self.asks_by_price,
        };
        map.get(&PriceKey(price)).map(|b| b.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn counters(&self) -> EventCounters {
        self.counters
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    pub fn depth_within_bps(&self, bps: f64) -> Option<super::l2::DepthWindow> {
        let mid = self.mid_price()?;
        let band = mid * bps / 10_000.0;
        let bid_vol: f64 = self.side_levels(Side::Bid).filter(|(p, _)| *p >= mid - band).map(|(_, q)| q).sum();
        let ask_vol: f64 = self.side_levels(Side::Ask).filter(|(p, _)| *p <= mid + band).map(|(_, q)| q).sum();
        Some(super::l2::DepthWindow { bid_vol, ask_vol })
    }
}

#[derive(Debug, Clone)]
pub struct ChecksumMismatch {
    pub symbol: String,
    pub expected: u32,
    pub computed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Level3Order, RecordKind};

    fn order(id: &str, event: Option<L3Event>, price: f64, qty: f64) -> Level3Order {
        Level3Order { event, order_id: id.into(), limit_price: price, order_qty: qty, timestamp: "t".into() }
    }

    fn snapshot_one_bid() -> Level3Record {
        Level3Record {
            timestamp: "t".into(),
            symbol: "BTC/USD".into(),
            kind: RecordKind::Snapshot,
            bids: vec![order("A", None, 100.0, 1.0)],
            asks: vec![],
            checksum: 0,
        }
    }

    fn update(bids: Vec<Level3Order>, checksum: u32) -> Level3Record {
        Level3Record { timestamp: "t".into(), symbol: "BTC/USD".into(), kind: RecordKind::Update, bids, asks: vec![], checksum }
    }

    #[test]
    fn s4_add_modify_delete_sequence() {
        let mut book = L3Book::new();
        book.apply_snapshot(&snapshot_one_bid());

        book.apply_update(&update(vec![order("B", Some(L3Event::Add), 100.0, 0.5)], book.checksum())).unwrap();
        book.apply_update(&update(vec![order("A", Some(L3Event::Modify), 100.0, 0.3)], book.checksum())).unwrap();
        let checksum_before_delete = book.checksum();
        book.apply_update(&update(vec![order("B", Some(L3Event::Delete), 100.0, 0.0)], checksum_before_delete)).unwrap();

        assert_eq!(book.order_ids_at(Side::Bid, 100.0), vec!["A".to_string()]);
        assert_eq!(book.orders_at_best(Side::Bid), 1);
    }

    #[test]
    fn add_of_existing_id_is_protocol_state_error() {
        let mut book = L3Book::new();
        book.apply_snapshot(&snapshot_one_bid());
        let result = book.apply_update(&update(vec![order("A", Some(L3Event::Add), 100.0, 1.0)], 0));
        assert!(result.is_err());
    }

    #[test]
    fn modify_of_unknown_id_is_protocol_state_error() {
        let mut book = L3Book::new();
        book.apply_snapshot(&snapshot_one_bid());
        let result = book.apply_update(&update(vec![order("ZZZ", Some(L3Event::Modify), 100.0, 1.0)], 0));
        assert!(result.is_err());
    }

    #[test]
    fn double_delete_of_same_id_is_an_error() {
        let mut book = L3Book::new();
        book.apply_snapshot(&snapshot_one_bid());
        let checksum = book.checksum();
        book.apply_update(&update(vec![order("A", Some(L3Event::Delete), 100.0, 0.0)], checksum)).unwrap();
        let result = book.apply_update(&update(vec![order("A", Some(L3Event::Delete), 100.0, 0.0)], 0));
        assert!(result.is_err());
    }

    #[test]
    fn fifo_order_preserved_at_price_level() {
        let mut book = L3Book::new();
        book.apply_snapshot(&snapshot_one_bid());
        book.apply_update(&update(vec![order("B", Some(L3Event::Add), 100.0, 1.0)], book.checksum())).unwrap();
        book.apply_update(&update(vec![order("C", Some(L3Event::Add), 100.0, 1.0)], book.checksum())).unwrap();
        assert_eq!(book.order_ids_at(Side::Bid, 100.0), vec!["A", "B", "C"]);
    }

    #[test]
    fn event_counters_increment_per_event() {
        let mut book = L3Book::new();
        book.apply_snapshot(&snapshot_one_bid());
        book.apply_update(&update(vec![order("B", Some(L3Event::Add), 100.0, 1.0)], book.checksum())).unwrap();
        book.apply_update(&update(vec![order("A", Some(L3Event::Modify), 100.0, 2.0)], book.checksum())).unwrap();
        book.apply_update(&update(vec![order("B", Some(L3Event::Delete), 100.0, 0.0)], book.checksum())).unwrap();

        let counters = book.counters();
        assert_eq!(counters.adds, 1);
        assert_eq!(counters.modifies, 1);
        assert_eq!(counters.deletes, 1);
    }
}
