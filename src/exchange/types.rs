//! Shared data model: `Order`, `OrderBook`-adjacent status types,
//! `ExchangeConfig`, and the cross-strategy entities from the data model
//! section of the spec (`PositionSnapshot`, `HedgeIntent`,
//! `ReconcileSignature`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// OPEN = a maker entry order for the strategy's own inventory.
/// CLOSE = a reduce-only take-profit / hedge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRole {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    CanceledPostOnly,
    CanceledMargin,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::CanceledPostOnly
                | OrderStatus::CanceledMargin
                | OrderStatus::Rejected
        )
    }

    pub fn is_open_ish(self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    /// True for the two rejection outcomes the take-profit/reconcile ladders
    /// treat as "advance to the next price", rather than a terminal success
    /// or an adapter-level `Err`.
    pub fn is_post_only_or_margin_cancel(self) -> bool {
        matches!(self, OrderStatus::CanceledPostOnly | OrderStatus::CanceledMargin)
    }

    /// Forward-only transition check per the order lifecycle state machine (spec §4.3).
    /// Status regressions (e.g. OPEN observed after FILLED) must be ignored by callers.
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::Submitted => 0,
            OrderStatus::Open => 1,
            OrderStatus::PartiallyFilled => 2,
            OrderStatus::Filled => 3,
            OrderStatus::Canceled | OrderStatus::CanceledPostOnly | OrderStatus::CanceledMargin
            | OrderStatus::Rejected => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub client_order_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub filled_size: f64,
    pub status: OrderStatus,
    pub order_role: OrderRole,
    pub reduce_only: bool,
    pub post_only: bool,
}

impl Order {
    pub fn remaining_size(&self) -> f64 {
        (self.size - self.filled_size).max(0.0)
    }

    /// Records a fresh fill observation. The maximum filled_size ever observed
    /// is authoritative (spec §4.3/§5); this never decreases `filled_size`.
    pub fn observe_filled_size(&mut self, filled: f64) {
        if filled > self.filled_size {
            self.filled_size = filled;
        }
    }

    /// Applies a status observation, ignoring regressions per spec §4.3/§5.
    pub fn observe_status(&mut self, status: OrderStatus) {
        if status.rank() >= self.status.rank() && !self.status.is_terminal() {
            self.status = status;
        }
    }
}

/// The venue's acknowledgement of a submitted action. `success=true` only
/// means the venue accepted submission; the caller must independently
/// confirm terminal state (spec §4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub side: Option<Side>,
    pub size: Option<f64>,
    pub price: Option<f64>,
    pub status: Option<OrderStatus>,
    pub filled_size: Option<f64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub filled_size: f64,
    pub status: OrderStatus,
    pub order_role: OrderRole,
}

/// Either a fixed tick offset or a percentage offset, resolved against
/// tick_size or fill price respectively. Mirrors spec's tick-mode /
/// percent-mode CLI override rule (§6: tick flags override percent flags).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Offset {
    Ticks(i64),
    Percent(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub ticker: String,
    pub contract_id: String,
    pub tick_size: f64,
    pub quantity: f64,
    pub take_profit: Offset,
    pub grid_step: Offset,
    pub direction: Side,
    pub max_orders: usize,
    pub wait_time: u64,
    /// Sentinel -1.0 disables the guard.
    pub stop_price: f64,
    /// Sentinel -1.0 disables the guard.
    pub pause_price: f64,
    pub boost_mode: bool,
}

impl ExchangeConfig {
    pub fn close_side(&self) -> Side {
        self.direction.opposite()
    }

    pub fn stop_enabled(&self) -> bool {
        self.stop_price > 0.0
    }

    pub fn pause_enabled(&self) -> bool {
        self.pause_price > 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub venue: String,
    pub ticker: String,
    /// Positive = long, negative = short, zero = flat.
    pub net_size: f64,
    pub avg_entry_price: f64,
    pub timestamp_ms: u64,
}

impl PositionSnapshot {
    pub fn is_flat(&self) -> bool {
        self.net_size.abs() < 1e-9
    }
}

/// A pending compensating order derived from a maker-venue fill (XHB, spec §4.9).
/// Consumed exactly once; never persisted across restarts.
#[derive(Debug, Clone)]
pub struct HedgeIntent {
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub source_fill_id: String,
}

/// Dedup record for reconcile attempts (spec §4.5 step 4). Entries older than
/// 30s are ignored by the caller.
#[derive(Debug, Clone)]
pub struct ReconcileSignature {
    pub close_side: Side,
    pub deficit_quantity: f64,
    pub attempted_at_ms: u64,
    pub pending: bool,
}

impl ReconcileSignature {
    /// Suppression window: 5s if the prior attempt settled, 30s if it is still pending.
    pub fn is_suppressing(&self, now_ms: u64, candidate_side: Side, candidate_deficit: f64) -> bool {
        if self.close_side != candidate_side {
            return false;
        }
        if (self.deficit_quantity - candidate_deficit).abs() > f64::EPSILON.max(candidate_deficit * 0.01) {
            return false;
        }
        let window_ms = if self.pending { 30_000 } else { 5_000 };
        now_ms.saturating_sub(self.attempted_at_ms) < window_ms
    }
}
