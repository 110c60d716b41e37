//! Cross-Venue Hedge Bot (component I, spec §4.9). Places a post-only
//! maker-leg order and, on any fill, fires a compensating order on a second
//! venue so the net signed position across the two venues stays near zero.
//! A 1 Hz position monitor is the safety net for a fill notification that
//! never arrived; `hedge_in_progress` plus a 1s grace window keeps that
//! monitor from double-hedging a fill the event path is already handling.
//!
//! Grounded on the teacher's `InternalInventory`/publisher pairing in
//! `execution.rs` and `publisher.rs` (maintain local truth, diff against the
//! venue, notify on drift) generalized from one venue to two, and on
//! `original_source/hedge/hedge_mode_grvt.py` for the maker-leg
//! open/reprice/fill-then-hedge cycle itself.

use crate::errors::EngineResult;
use crate::exchange::types::{HedgeIntent, OrderRole, OrderStatus, PositionSnapshot, Side};
use crate::exchange::ExchangeClient;
use crate::lifecycle::poll_order_until_terminal;
use crate::notify::{Notification, Notifier, Severity};
use crate::ratelimit::RateLimiter;
use crate::tradelog::{TradeLogRow, TradeLogWriter};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

/// Poll cadence used while waiting for a taker-leg fill confirmation.
const TAKER_CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How far the two venues' net size may drift before a corrective hedge
/// order is issued on the next `reconcile` tick.
const DRIFT_TOLERANCE: f64 = 1e-6;

/// Mutual-exclusion window between event-driven fill hedging and the
/// position-monitor's corrective pass (spec §5: "mutually exclusive via the
/// `hedge_in_progress` flag plus a 1 s grace window").
const HEDGE_GRACE_MS: u64 = 1_000;

/// A maker-leg order currently resting on the maker venue.
struct OpenMakerOrder {
    order_id: String,
    price: f64,
    placed_at_ms: u64,
    filled_size: f64,
}

pub struct HedgeCoordinator {
    maker: Box<dyn ExchangeClient>,
    hedge: Box<dyn ExchangeClient>,
    maker_contract_id: String,
    hedge_contract_id: String,
    session_id: String,
    quantity: f64,
    direction: Side,
    /// Absolute price drift from the maker BBO that triggers a cancel+replace.
    reprice_drift: f64,
    /// Age beyond which a resting maker order is cancelled and replaced
    /// even without drift, so a stale quote isn't left resting forever.
    max_open_age_ms: u64,
    /// How long `drain_pending` waits for a taker-leg market order to
    /// confirm as filled before proceeding best-effort (spec §4.9 step 3).
    fill_timeout: Duration,
    maker_order: Option<OpenMakerOrder>,
    pending: VecDeque<HedgeIntent>,
    last_hedge_at_ms: Option<u64>,
    maker_limiter: Arc<RateLimiter>,
    hedge_limiter: Arc<RateLimiter>,
    tradelog: TradeLogWriter,
    notifier: Arc<dyn Notifier>,
}

impl HedgeCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        maker: Box<dyn ExchangeClient>,
        hedge: Box<dyn ExchangeClient>,
        maker_contract_id: impl Into<String>,
        hedge_contract_id: impl Into<String>,
        quantity: f64,
        direction: Side,
        reprice_drift: f64,
        max_open_age_ms: u64,
        fill_timeout: Duration,
        maker_limiter: Arc<RateLimiter>,
        hedge_limiter: Arc<RateLimiter>,
        tradelog: TradeLogWriter,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            maker,
            hedge,
            maker_contract_id: maker_contract_id.into(),
            hedge_contract_id: hedge_contract_id.into(),
            session_id: Uuid::new_v4().to_string(),
            quantity,
            direction,
            reprice_drift,
            max_open_age_ms,
            fill_timeout,
            maker_order: None,
            pending: VecDeque::new(),
            last_hedge_at_ms: None,
            maker_limiter,
            hedge_limiter,
            tradelog,
            notifier,
        }
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn hedge_in_progress(&self, now_ms: u64) -> bool {
        self.last_hedge_at_ms.map(|t| now_ms.saturating_sub(t) < HEDGE_GRACE_MS).unwrap_or(false)
    }

    /// Step 1: places a post-only limit order on the maker venue at its own
    /// BBO, if one isn't already resting. No-op otherwise.
    pub async fn ensure_maker_leg(&mut self) -> EngineResult<()> {
        if self.maker_order.is_some() {
            return Ok(());
        }
        self.maker_limiter.acquire().await;
        let (bid, ask) = self.maker.fetch_bbo(&self.maker_contract_id).await?;
        let price = match self.direction {
            Side::Buy => bid,
            Side::Sell => ask,
        };
        let client_order_id = format!("{}-maker-{}", self.session_id, Self::now_ms());
        let result = self
            .maker
            .place_open_order(&self.maker_contract_id, self.quantity, price, self.direction, &client_order_id)
            .await?;
        self.log_row(&result, &self.maker_contract_id.clone(), "hedge-maker");

        match result.status {
            Some(OrderStatus::Filled) => {
                self.on_maker_fill(self.direction, result.filled_size.unwrap_or(self.quantity), result.price.unwrap_or(price), result.order_id.unwrap_or_default());
            }
            Some(OrderStatus::CanceledPostOnly) | Some(OrderStatus::CanceledMargin) => {
                log::debug!("[HEDGE] {} maker leg rejected ({:?}), will retry next tick", self.maker_contract_id, result.status);
            }
            _ => {
                self.maker_order = Some(OpenMakerOrder {
                    order_id: result.order_id.unwrap_or_default(),
                    price,
                    placed_at_ms: Self::now_ms(),
                    filled_size: result.filled_size.unwrap_or(0.0),
                });
            }
        }
        Ok(())
    }

    /// Step 4: cancels and re-places the resting maker order if its price
    /// has drifted too far from the current maker BBO, or if it has been
    /// open beyond `max_open_age_ms`. Spec's open question on hedge
    /// re-pricing is resolved as cancel+reissue, never in-place re-price.
    pub async fn maybe_reprice_maker(&mut self) -> EngineResult<()> {
        let Some(order) = &self.maker_order else { return Ok(()) };
        let now = Self::now_ms();
        let aged_out = now.saturating_sub(order.placed_at_ms) > self.max_open_age_ms;

        self.maker_limiter.acquire().await;
        let (bid, ask) = self.maker.fetch_bbo(&self.maker_contract_id).await?;
        let reference = match self.direction {
            Side::Buy => bid,
            Side::Sell => ask,
        };
        let drifted = (reference - order.price).abs() > self.reprice_drift;

        if !aged_out && !drifted {
            return Ok(());
        }

        let order_id = order.order_id.clone();
        self.maker.cancel_order(&order_id).await?;
        self.maker_order = None;
        log::info!("[HEDGE] {} maker order {order_id} cancelled (aged_out={aged_out}, drifted={drifted}), re-pricing", self.maker_contract_id);
        self.ensure_maker_leg().await
    }

    /// Step 2: called for every fill (partial or full) of the maker order.
    /// Constructs the opposite-side hedge intent and marks a hedge as
    /// in-progress so the position monitor doesn't double-hedge the same
    /// fill. Exactly-once semantics against a single fill increment are the
    /// caller's responsibility (dedupe by `(maker_order_id,
    /// filled_size_increment)` at the order-stream boundary).
    pub fn on_maker_fill(&mut self, side: Side, quantity: f64, price: f64, source_fill_id: String) {
        if quantity <= 0.0 {
            return;
        }
        if let Some(order) = &mut self.maker_order {
            order.filled_size += quantity;
            if order.filled_size + 1e-9 >= self.quantity {
                self.maker_order = None;
            }
        }
        self.last_hedge_at_ms = Some(Self::now_ms());
        self.pending.push_back(HedgeIntent {
            side: side.opposite(),
            quantity,
            price,
            source_fill_id,
        });
    }

    /// Step 3: drains queued hedge intents, placing one market order per
    /// intent on the hedge venue (a hedge position may need to open, not
    /// just close — spec §4.9 distinguishes the hedge leg from a
    /// take-profit leg by never setting `reduce_only`). Waits up to
    /// `fill_timeout` for the order to confirm filled; an unconfirmed
    /// order is assumed best-effort filled and left for the position
    /// monitor to repair.
    pub async fn drain_pending(&mut self) -> EngineResult<()> {
        while let Some(intent) = self.pending.pop_front() {
            self.hedge_limiter.acquire().await;
            let result = self
                .hedge
                .place_market_order(&self.hedge_contract_id, intent.quantity, intent.side, false)
                .await?;
            self.log_row(&result, &self.hedge_contract_id.clone(), "hedge-taker");

            if !matches!(result.status, Some(OrderStatus::Filled)) {
                if let Some(order_id) = &result.order_id {
                    let confirmed = poll_order_until_terminal(self.hedge.as_ref(), order_id, TAKER_CONFIRM_POLL_INTERVAL, self.fill_timeout).await;
                    match confirmed {
                        Ok(info) if info.status == OrderStatus::Filled => {}
                        Ok(info) => log::warn!(
                            "[HEDGE] {} taker order {order_id} not confirmed filled within {:?} (status {:?}), proceeding best-effort",
                            self.hedge_contract_id, self.fill_timeout, info.status
                        ),
                        Err(e) => log::warn!("[HEDGE] {} taker order {order_id} confirmation failed: {e}, proceeding best-effort", self.hedge_contract_id),
                    }
                }
            }
        }
        Ok(())
    }

    /// Step 5: compares the two venues' net positions and queues a
    /// corrective order for any drift beyond `DRIFT_TOLERANCE`, unless a
    /// hedge is already in progress (grace window). This is the safety net
    /// for a dropped fill notification.
    pub async fn reconcile(&mut self) -> EngineResult<PositionDrift> {
        self.maker_limiter.acquire().await;
        let maker_pos = self.maker.get_account_positions(&self.maker_contract_id).await?;
        self.hedge_limiter.acquire().await;
        let hedge_pos = self.hedge.get_account_positions(&self.hedge_contract_id).await?;
        let drift = maker_pos.net_size + hedge_pos.net_size;
        let tolerance = DRIFT_TOLERANCE.max(self.quantity * 0.001);
        if drift.abs() < tolerance || self.hedge_in_progress(Self::now_ms()) {
            return Ok(PositionDrift { maker_pos, hedge_pos, corrective_quantity: 0.0 });
        }
        let corrective_side = if drift > 0.0 { Side::Sell } else { Side::Buy };
        let corrective_quantity = drift.abs();
        self.notifier
            .notify(Notification {
                session_id: self.session_id.clone(),
                severity: Severity::Warn,
                message: format!(
                    "cross-venue drift {drift:.6} detected (maker {:.6}, hedge {:.6}), issuing corrective {corrective_side} order",
                    maker_pos.net_size, hedge_pos.net_size
                ),
            })
            .await;
        self.pending.push_back(HedgeIntent {
            side: corrective_side,
            quantity: corrective_quantity,
            price: 0.0,
            source_fill_id: "reconcile".to_string(),
        });
        Ok(PositionDrift { maker_pos, hedge_pos, corrective_quantity })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn log_row(&mut self, result: &crate::exchange::types::OrderResult, ticker: &str, strategy: &str) {
        self.tradelog.append(&TradeLogRow {
            ts_ms: Self::now_ms(),
            strategy: strategy.to_string(),
            ticker: ticker.to_string(),
            order_id: result.order_id.clone().unwrap_or_default(),
            side: result.side.unwrap_or(self.direction),
            order_role: OrderRole::Open,
            price: result.price.unwrap_or(0.0),
            size: result.size.unwrap_or(0.0),
            filled_size: result.filled_size.unwrap_or(0.0),
            status: result.status.unwrap_or(crate::exchange::types::OrderStatus::Submitted),
            pnl_usd: None,
        });
    }
}

#[derive(Debug, Clone)]
pub struct PositionDrift {
    pub maker_pos: PositionSnapshot,
    pub hedge_pos: PositionSnapshot,
    pub corrective_quantity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::sim::SimExchange;
    use crate::notify::LogNotifier;
    use std::time::Duration;

    fn coordinator() -> HedgeCoordinator {
        let tmp = std::env::temp_dir().join(format!("hedgetest-{}", Uuid::new_v4()));
        HedgeCoordinator::new(
            Box::new(SimExchange::new("BTC-PERP", 0.5, 100.0)),
            Box::new(SimExchange::new("BTC-PERP-H", 0.5, 100.0)),
            "BTC-PERP",
            "BTC-PERP-H",
            1.0,
            Side::Buy,
            1.0,
            5_000,
            Duration::from_millis(200),
            Arc::new(RateLimiter::new(10, Duration::from_secs(1))),
            Arc::new(RateLimiter::new(10, Duration::from_secs(1))),
            TradeLogWriter::new(tmp),
            Arc::new(LogNotifier),
        )
    }

    #[test]
    fn a_maker_fill_queues_the_opposite_side_intent() {
        let mut c = coordinator();
        c.on_maker_fill(Side::Buy, 1.0, 100.0, "fill-1".to_string());
        assert_eq!(c.pending_count(), 1);
        assert_eq!(c.pending.front().unwrap().side, Side::Sell);
    }

    #[tokio::test]
    async fn draining_a_queued_intent_places_a_hedge_order() {
        let mut c = coordinator();
        c.on_maker_fill(Side::Buy, 1.0, 100.0, "fill-1".to_string());
        c.drain_pending().await.unwrap();
        assert_eq!(c.pending_count(), 0);
        let pos = c.hedge.get_account_positions("BTC-PERP-H").await.unwrap();
        assert_eq!(pos.net_size, -1.0);
    }

    #[tokio::test]
    async fn balanced_venues_report_zero_drift() {
        let mut c = coordinator();
        let drift = c.reconcile().await.unwrap();
        assert_eq!(drift.corrective_quantity, 0.0);
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn an_unhedged_maker_fill_is_caught_on_reconcile() {
        let mut c = coordinator();
        c.maker.place_open_order("BTC-PERP", 2.0, 101.0, Side::Buy, "c1").await.unwrap();
        let drift = c.reconcile().await.unwrap();
        assert_eq!(drift.corrective_quantity, 2.0);
        assert_eq!(c.pending_count(), 1);
    }

    #[tokio::test]
    async fn a_hedge_in_progress_grace_window_suppresses_reconcile_corrections() {
        let mut c = coordinator();
        c.maker.place_open_order("BTC-PERP", 2.0, 101.0, Side::Buy, "c1").await.unwrap();
        c.on_maker_fill(Side::Buy, 2.0, 101.0, "fill-1".to_string());
        // The event path already queued a hedge intent; reconcile must not
        // queue a second corrective for the same drift within the grace window.
        let before = c.pending_count();
        let drift = c.reconcile().await.unwrap();
        assert_eq!(drift.corrective_quantity, 0.0);
        assert_eq!(c.pending_count(), before);
    }

    #[tokio::test]
    async fn ensure_maker_leg_places_a_resting_order_when_none_is_open() {
        let mut c = coordinator();
        // Buy direction prices off the maker's own bid (99.5 against a
        // mid of 100.0), which doesn't cross, so the order rests.
        c.ensure_maker_leg().await.unwrap();
        assert!(c.maker_order.is_some());
        // A second call while one is already resting is a no-op.
        let order_id = c.maker_order.as_ref().unwrap().order_id.clone();
        c.ensure_maker_leg().await.unwrap();
        assert_eq!(c.maker_order.as_ref().unwrap().order_id, order_id);
    }
}
