//! Order Book Mirror (component C). Maintains a local bid/ask view from a
//! venue's WS snapshot+delta stream, validating sequence offsets and
//! detecting crossed/invalid books per spec §4.2.
//!
//! Grounded on the teacher's `ingestor.rs::MarketDataBuffer`/`L2BookSnapshot`
//! heartbeat-and-touch pattern, generalized from "one HL-shaped struct" into
//! an offset-validated mirror usable by any venue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A single `[price, size]` level as sent by some venues, or the equivalent
/// `{price, size}` object sent by others. The spec leaves this ambiguous and
/// requires supporting both (§9 open questions) — both shapes deserialize
/// into this type via a custom `Deserialize` impl.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: f64,
    pub size: f64,
}

impl<'de> serde::Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Tuple(f64, f64),
            Object { price: f64, size: f64 },
        }
        match Wire::deserialize(deserializer)? {
            Wire::Tuple(price, size) => Ok(Level { price, size }),
            Wire::Object { price, size } => Ok(Level { price, size }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderBookSnapshotMsg {
    pub offset: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderBookDeltaMsg {
    pub offset: u64,
    pub bid_updates: Vec<Level>,
    pub ask_updates: Vec<Level>,
}

/// Bid keys are stored negated so that `BTreeMap`'s ascending iteration gives
/// descending price order for the best bid without a second comparator type.
#[derive(Debug)]
pub struct OrderBookMirror {
    bids: BTreeMap<u64, f64>,
    asks: BTreeMap<u64, f64>,
    offset: u64,
    snapshot_loaded: bool,
    valid: bool,
    last_message_at: Instant,
    updates_since_cleanup: u64,
    ready: Arc<Notify>,
}

const CLEANUP_INTERVAL: u64 = 500;
const PRICE_SCALE: f64 = 1e8;

fn price_key(price: f64) -> u64 {
    (price * PRICE_SCALE).round() as u64
}

fn key_price(key: u64) -> f64 {
    key as f64 / PRICE_SCALE
}

impl OrderBookMirror {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            offset: 0,
            snapshot_loaded: false,
            valid: false,
            last_message_at: Instant::now(),
            updates_since_cleanup: 0,
            ready: Arc::new(Notify::new()),
        }
    }

    /// Step 1: apply a snapshot. Clears the book, marks it loaded, records offset.
    pub fn apply_snapshot(&mut self, msg: OrderBookSnapshotMsg) {
        self.bids.clear();
        self.asks.clear();
        for lvl in msg.bids {
            if lvl.size > 0.0 {
                self.bids.insert(price_key(lvl.price), lvl.size);
            }
        }
        for lvl in msg.asks {
            if lvl.size > 0.0 {
                self.asks.insert(price_key(lvl.price), lvl.size);
            }
        }
        self.offset = msg.offset;
        self.snapshot_loaded = true;
        self.touch();
        self.recompute_validity();
        if self.valid {
            self.ready.notify_waiters();
        }
    }

    /// Step 2/3: apply a delta. Returns `Err` (sequence gap) if the caller
    /// must resubscribe and re-snapshot.
    pub fn apply_delta(&mut self, msg: OrderBookDeltaMsg) -> Result<(), SequenceGap> {
        if !self.snapshot_loaded || msg.offset <= self.offset {
            self.invalidate();
            return Err(SequenceGap);
        }
        for lvl in msg.bid_updates {
            let key = price_key(lvl.price);
            if lvl.size <= 0.0 {
                self.bids.remove(&key);
            } else {
                self.bids.insert(key, lvl.size);
            }
        }
        for lvl in msg.ask_updates {
            let key = price_key(lvl.price);
            if lvl.size <= 0.0 {
                self.asks.remove(&key);
            } else {
                self.asks.insert(key, lvl.size);
            }
        }
        self.offset = msg.offset;
        self.touch();
        self.recompute_validity();

        self.updates_since_cleanup += 1;
        if self.updates_since_cleanup >= CLEANUP_INTERVAL {
            self.prune_stale();
            self.updates_since_cleanup = 0;
        }

        if !self.valid {
            return Err(SequenceGap);
        }
        Ok(())
    }

    fn recompute_validity(&mut self) {
        let bid = self.best_bid();
        let ask = self.best_ask();
        self.valid = match (bid, ask) {
            (Some(b), Some(a)) => b > 0.0 && a > 0.0 && b < a,
            (None, None) => self.snapshot_loaded,
            _ => true,
        };
    }

    fn prune_stale(&mut self) {
        self.bids.retain(|_, &mut sz| sz > 0.0);
        self.asks.retain(|_, &mut sz| sz > 0.0);
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
        self.snapshot_loaded = false;
        self.bids.clear();
        self.asks.clear();
    }

    fn touch(&mut self) {
        self.last_message_at = Instant::now();
    }

    pub fn is_stale(&self, heartbeat_interval: Duration) -> bool {
        self.last_message_at.elapsed() > heartbeat_interval
    }

    pub fn is_ready(&self) -> bool {
        self.valid && self.snapshot_loaded
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().map(|&k| key_price(k))
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().map(|&k| key_price(k))
    }

    pub fn best_levels(&self) -> ((f64, f64), (f64, f64)) {
        let bid = self.bids.iter().next_back().map(|(&k, &s)| (key_price(k), s)).unwrap_or((0.0, 0.0));
        let ask = self.asks.iter().next().map(|(&k, &s)| (key_price(k), s)).unwrap_or((0.0, 0.0));
        (bid, ask)
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// Resolves once the first valid snapshot has been applied.
    pub async fn wait_ready(&self) {
        if self.is_ready() {
            return;
        }
        let notified = self.ready.notified();
        if self.is_ready() {
            return;
        }
        notified.await;
    }

    pub fn ready_handle(&self) -> Arc<Notify> {
        self.ready.clone()
    }
}

impl Default for OrderBookMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceGap;

impl std::fmt::Display for SequenceGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "order book sequence gap")
    }
}
impl std::error::Error for SequenceGap {}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(offset: u64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> OrderBookSnapshotMsg {
        OrderBookSnapshotMsg {
            offset,
            bids: bids.iter().map(|&(p, s)| Level { price: p, size: s }).collect(),
            asks: asks.iter().map(|&(p, s)| Level { price: p, size: s }).collect(),
        }
    }

    #[test]
    fn snapshot_then_best_levels() {
        let mut ob = OrderBookMirror::new();
        ob.apply_snapshot(snap(1, &[(100.0, 1.0), (99.5, 2.0)], &[(100.5, 1.0), (101.0, 2.0)]));
        assert_eq!(ob.best_bid(), Some(100.0));
        assert_eq!(ob.best_ask(), Some(100.5));
        assert!(ob.is_ready());
        assert_eq!(ob.mid_price(), Some(100.25));
    }

    #[test]
    fn delta_with_stale_offset_is_a_gap() {
        let mut ob = OrderBookMirror::new();
        ob.apply_snapshot(snap(5, &[(100.0, 1.0)], &[(100.5, 1.0)]));
        let result = ob.apply_delta(OrderBookDeltaMsg {
            offset: 5,
            bid_updates: vec![Level { price: 100.0, size: 2.0 }],
            ask_updates: vec![],
        });
        assert!(result.is_err());
        assert!(!ob.is_ready());
    }

    #[test]
    fn delta_removes_zero_size_level() {
        let mut ob = OrderBookMirror::new();
        ob.apply_snapshot(snap(1, &[(100.0, 1.0), (99.0, 1.0)], &[(101.0, 1.0)]));
        ob.apply_delta(OrderBookDeltaMsg {
            offset: 2,
            bid_updates: vec![Level { price: 100.0, size: 0.0 }],
            ask_updates: vec![],
        })
        .unwrap();
        assert_eq!(ob.best_bid(), Some(99.0));
    }

    #[test]
    fn crossed_book_is_invalid() {
        let mut ob = OrderBookMirror::new();
        ob.apply_snapshot(snap(1, &[(100.0, 1.0)], &[(100.5, 1.0)]));
        ob.apply_delta(OrderBookDeltaMsg {
            offset: 2,
            bid_updates: vec![Level { price: 101.0, size: 1.0 }],
            ask_updates: vec![],
        })
        .unwrap_err();
        assert!(!ob.is_ready());
    }

    #[test]
    fn level_parses_both_wire_shapes() {
        let tuple: Level = serde_json::from_str("[100.5, 2.0]").unwrap();
        assert_eq!(tuple.price, 100.5);
        let object: Level = serde_json::from_str(r#"{"price":100.5,"size":2.0}"#).unwrap();
        assert_eq!(object.price, 100.5);
        assert_eq!(tuple, object);
    }
}
