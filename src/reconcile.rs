//! Take-profit coverage reconciler (component G, spec §4.5). After every
//! fill and on a fixed cadence, compares the venue's reported position
//! against the size covered by resting close orders and issues a
//! corrective reduce-only order for any deficit — deduped against a recent
//! attempt via `ReconcileSignature` so a slow-to-settle correction isn't
//! resubmitted on every tick.
//!
//! Grounded on the teacher's `execution.rs::InternalInventory::reconcile`
//! (diff internal vs. live REST state, log and correct) and
//! `reconcile_after_reconnect` (cancel-all before re-deriving truth).

use crate::errors::EngineResult;
use crate::exchange::types::{Offset, OrderRole, OrderStatus, PositionSnapshot, ReconcileSignature, Side};
use crate::exchange::ExchangeClient;
use crate::lifecycle::poll_order_until_terminal;
use crate::tp_ladder::MarketReferencedLadder;
use tokio::time::Duration;

/// Consecutive post-only/not-found cancellations before giving up on the
/// passive ladder and falling back to a market order.
const MAX_CONSECUTIVE_POST_ONLY_FAILURES: u32 = 3;
const MAX_RECONCILE_ATTEMPTS: usize = 5;
/// Shortened from the 5s the original waits for a venue to settle a resting
/// order before re-checking it by order_id — long enough to let `SimExchange`
/// style adapters observe the order, short enough not to stall the engine loop.
const VERIFY_POLL_INTERVAL: Duration = Duration::from_millis(25);
const VERIFY_MAX_WAIT: Duration = Duration::from_millis(150);

pub struct TpReconciler {
    last_attempt: Option<ReconcileSignature>,
}

impl TpReconciler {
    pub fn new() -> Self {
        Self { last_attempt: None }
    }

    /// `covered_close_size` is the sum of open reduce-only order sizes the
    /// caller already believes are resting. Returns the deficit quantity
    /// and its side if a correction is warranted, or `None` if coverage is
    /// adequate or a matching attempt is already in its suppression window.
    pub fn check_deficit(
        &mut self,
        position: &PositionSnapshot,
        covered_close_size: f64,
        now_ms: u64,
    ) -> Option<(Side, f64)> {
        if position.is_flat() {
            return None;
        }
        let close_side = if position.net_size > 0.0 { Side::Sell } else { Side::Buy };
        let exposed = position.net_size.abs();
        let deficit = (exposed - covered_close_size).max(0.0);
        if deficit < 1e-9 {
            return None;
        }
        if let Some(sig) = &self.last_attempt {
            if sig.is_suppressing(now_ms, close_side, deficit) {
                return None;
            }
        }
        Some((close_side, deficit))
    }

    pub fn record_attempt(&mut self, close_side: Side, deficit: f64, now_ms: u64, pending: bool) {
        self.last_attempt = Some(ReconcileSignature {
            close_side,
            deficit_quantity: deficit,
            attempted_at_ms: now_ms,
            pending,
        });
    }

    pub fn mark_settled(&mut self) {
        if let Some(sig) = &mut self.last_attempt {
            sig.pending = false;
        }
    }

    /// Places the corrective reduce-only order, running it through a
    /// 5-attempt passive ladder priced off the live BBO (`k * take_profit%`
    /// per attempt, refreshed every attempt) before falling back to a
    /// market order. Three consecutive post-only/not-found cancellations
    /// abandon the ladder early. A successfully-placed order is
    /// re-verified by order_id after a short wait rather than trusted on
    /// the initial ack alone (spec §4.5 step 6).
    ///
    /// Grounded on `original_source/trading_bot_tick.py`'s
    /// `_reconcile_close_coverage`: same k*tp%-against-opponent-best
    /// pricing, same 3-consecutive-failure counter, same
    /// place-then-re-verify-by-order_id protocol.
    pub async fn correct(
        &mut self,
        exchange: &mut dyn ExchangeClient,
        contract_id: &str,
        close_side: Side,
        deficit: f64,
        now_ms: u64,
        tick_size: f64,
        take_profit: Offset,
        client_order_id: &str,
    ) -> EngineResult<()> {
        self.record_attempt(close_side, deficit, now_ms, true);

        let mut ladder = MarketReferencedLadder::new(close_side, tick_size, take_profit, MAX_RECONCILE_ATTEMPTS);
        let mut post_only_failures = 0u32;

        while !ladder.is_exhausted() {
            let (bid, ask) = exchange.fetch_bbo(contract_id).await?;
            let step = ladder.current_step(bid, ask);
            let result = exchange.place_close_order(contract_id, deficit, step.price, close_side, client_order_id).await?;

            let settled_status = match result.status {
                Some(status) if status.is_post_only_or_margin_cancel() => Some(status),
                _ => match &result.order_id {
                    Some(order_id) => {
                        let verified = poll_order_until_terminal(exchange, order_id, VERIFY_POLL_INTERVAL, VERIFY_MAX_WAIT).await?;
                        if verified.status.is_open_ish() || verified.status == OrderStatus::Filled {
                            None
                        } else {
                            Some(verified.status)
                        }
                    }
                    None => None,
                },
            };

            match settled_status {
                None => {
                    self.mark_settled();
                    return Ok(());
                }
                Some(status) => {
                    post_only_failures += 1;
                    if post_only_failures >= MAX_CONSECUTIVE_POST_ONLY_FAILURES || !ladder.advance(status) {
                        break;
                    }
                }
            }
        }

        log::warn!("[RECONCILE] {contract_id} passive ladder exhausted, falling back to market order");
        let result = exchange.place_market_order(contract_id, deficit, close_side, true).await?;
        if result.status.map(|s| s.is_terminal()).unwrap_or(false) {
            self.mark_settled();
        }
        Ok(())
    }
}

impl Default for TpReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the outstanding reduce-only size for a list of active orders,
/// i.e. the coverage a `TpReconciler` should compare against the live
/// position. Pure helper kept free of `ExchangeClient` so strategies can
/// feed it a cached order list without an extra round trip.
pub fn covered_close_size(active_orders: &[crate::exchange::types::OrderInfo]) -> f64 {
    active_orders
        .iter()
        .filter(|o| o.order_role == OrderRole::Close)
        .map(|o| o.size - o.filled_size)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::PositionSnapshot;

    fn pos(net_size: f64) -> PositionSnapshot {
        PositionSnapshot {
            venue: "sim".to_string(),
            ticker: "BTC-PERP".to_string(),
            net_size,
            avg_entry_price: 100.0,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn flat_position_has_no_deficit() {
        let mut r = TpReconciler::new();
        assert!(r.check_deficit(&pos(0.0), 0.0, 1_000).is_none());
    }

    #[test]
    fn uncovered_long_position_reports_a_sell_deficit() {
        let mut r = TpReconciler::new();
        let (side, deficit) = r.check_deficit(&pos(2.0), 0.5, 1_000).unwrap();
        assert_eq!(side, Side::Sell);
        assert_eq!(deficit, 1.5);
    }

    #[test]
    fn a_pending_attempt_suppresses_a_matching_retry_within_the_window() {
        let mut r = TpReconciler::new();
        r.record_attempt(Side::Sell, 1.5, 1_000, true);
        assert!(r.check_deficit(&pos(2.0), 0.5, 1_010_000 - 999_000).is_some());
        assert!(r.check_deficit(&pos(2.0), 0.5, 1_500).is_none());
    }

    #[test]
    fn settled_attempt_uses_the_shorter_suppression_window() {
        let mut r = TpReconciler::new();
        r.record_attempt(Side::Sell, 1.5, 1_000, false);
        assert!(r.check_deficit(&pos(2.0), 0.5, 6_001).is_some());
        assert!(r.check_deficit(&pos(2.0), 0.5, 4_000).is_none());
    }
}
