//! Order Lifecycle Engine (component F, spec §4.3). Drives a single order
//! from submission to a terminal state, and drives a take-profit ladder from
//! its first passive attempt through to a market-order fallback.
//!
//! Grounded on `original_source/trading_bot_tick.py`'s
//! `_place_and_monitor_open_order` polling loop (poll at `wait_time`,
//! apply forward-only status updates, never resubmit on a transient
//! network error) and on the teacher's treatment of REST responses as
//! advisory until independently confirmed.

use crate::errors::{EngineError, EngineResult};
use crate::exchange::types::{OrderInfo, OrderResult, OrderStatus, Side};
use crate::exchange::ExchangeClient;
use crate::tp_ladder::{MarketReferencedLadder, TpLadder};
use tokio::time::{sleep, Duration};

/// Polls `get_order_info` every `poll_interval` until the order reaches a
/// terminal status or `max_wait` elapses. Returns the last observed info
/// either way — a non-terminal result on timeout is not an error, it's the
/// caller's signal to fall back to `get_finalized_order_from_api` or cancel.
pub async fn poll_order_until_terminal(
    exchange: &dyn ExchangeClient,
    order_id: &str,
    poll_interval: Duration,
    max_wait: Duration,
) -> EngineResult<OrderInfo> {
    let deadline = tokio::time::Instant::now() + max_wait;
    let mut last_status = OrderStatus::Submitted;
    loop {
        match exchange.get_order_info(order_id).await {
            Ok(info) => {
                if info.status.rank() >= last_status.rank() {
                    last_status = info.status;
                }
                if info.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                    return Ok(info);
                }
            }
            Err(EngineError::NotFound(_)) if tokio::time::Instant::now() >= deadline => {
                return Err(EngineError::NotFound(order_id.to_string()));
            }
            Err(e) if !matches!(e, EngineError::NotFound(_)) && tokio::time::Instant::now() >= deadline => {
                return Err(e);
            }
            Err(_) => {}
        }
        sleep(poll_interval).await;
    }
}

/// Drives a reduce-only take-profit order through both ladder phases: phase
/// one places at the fixed offset and advances on every `CanceledPostOnly`/
/// `CanceledMargin` outcome (never on an adapter `Err`, which propagates
/// immediately); once phase one is exhausted, phase two reprices against
/// the live BBO and repeats the same advance rule. If both phases exhaust,
/// places a marketable close so the position is guaranteed to close (spec
/// §4.4).
pub async fn run_tp_ladder(
    exchange: &mut dyn ExchangeClient,
    contract_id: &str,
    qty: f64,
    close_side: Side,
    client_order_id: &str,
    ladder: &mut TpLadder,
) -> EngineResult<OrderResult> {
    loop {
        let step = ladder.current_step();
        let result = exchange
            .place_close_order(contract_id, qty, step.price, close_side, client_order_id)
            .await?;
        match result.status {
            Some(status) if status.is_post_only_or_margin_cancel() => {
                if !ladder.advance(status) {
                    break;
                }
            }
            _ => return Ok(result),
        }
    }

    log::warn!("[TP LADDER] {contract_id} phase 1 exhausted after {} attempts, switching to phase 2 market-referenced pricing", ladder.current_step().attempt);

    let mut phase2 = MarketReferencedLadder::new(close_side, ladder.tick_size(), ladder.base_offset(), 5);
    let mut bbo: Option<(f64, f64)> = None;
    loop {
        if bbo.is_none() || phase2.should_refresh_bbo() {
            bbo = Some(exchange.fetch_bbo(contract_id).await?);
            phase2.note_bbo_refreshed();
        }
        let (bid, ask) = bbo.expect("just refreshed above");
        let step = phase2.current_step(bid, ask);
        let result = exchange
            .place_close_order(contract_id, qty, step.price, close_side, client_order_id)
            .await?;
        match result.status {
            Some(status) if status.is_post_only_or_margin_cancel() => {
                if !phase2.advance(status) {
                    break;
                }
            }
            _ => return Ok(result),
        }
    }

    log::warn!("[TP LADDER] {contract_id} phase 2 also exhausted, falling back to market order");
    exchange.place_market_order(contract_id, qty, close_side, true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::sim::SimExchange;
    use crate::exchange::types::Offset;

    #[tokio::test]
    async fn poll_order_until_terminal_returns_immediately_once_filled() {
        let mut ex = SimExchange::new("BTC-PERP", 0.5, 100.0);
        let placed = ex.place_open_order("BTC-PERP", 1.0, 101.0, Side::Buy, "c1").await.unwrap();
        let info = poll_order_until_terminal(&ex, &placed.order_id.unwrap(), Duration::from_millis(1), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(info.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn run_tp_ladder_falls_back_to_market_when_every_limit_is_rejected() {
        let mut ex = SimExchange::new("BTC-PERP", 0.5, 100.0);
        // Entry far below the mid means every ladder price for a Sell close
        // still undercuts the mid, so it's rejected (would cross) every time.
        let mut ladder = TpLadder::new(90.0, Side::Sell, 0.5, Offset::Ticks(4), 2);
        let result = run_tp_ladder(&mut ex, "BTC-PERP", 1.0, Side::Sell, "tp1", &mut ladder).await.unwrap();
        assert!(result.success);
    }
}
