//! End-to-end scenarios for the cross-venue hedge bot, driven against two
//! independent `SimExchange` instances so no network is required.

use perpgrid_engine::exchange::sim::SimExchange;
use perpgrid_engine::exchange::types::Side;
use perpgrid_engine::exchange::ExchangeClient;
use perpgrid_engine::notify::LogNotifier;
use perpgrid_engine::ratelimit::RateLimiter;
use perpgrid_engine::strategy::hedge::HedgeCoordinator;
use perpgrid_engine::tradelog::TradeLogWriter;
use std::sync::Arc;
use std::time::Duration;

fn coordinator() -> HedgeCoordinator {
    let tmp = std::env::temp_dir().join(format!("perpgrid-hedge-e2e-{}", uuid::Uuid::new_v4()));
    HedgeCoordinator::new(
        Box::new(SimExchange::new("BTC-PERP", 0.5, 100.0)),
        Box::new(SimExchange::new("BTC-PERP-H", 0.5, 100.0)),
        "BTC-PERP",
        "BTC-PERP-H",
        1.0,
        Side::Buy,
        1.0,
        30_000,
        Duration::from_millis(200),
        Arc::new(RateLimiter::new(10, Duration::from_secs(1))),
        Arc::new(RateLimiter::new(10, Duration::from_secs(1))),
        TradeLogWriter::new(tmp),
        Arc::new(LogNotifier),
    )
}

#[tokio::test]
async fn a_maker_fill_is_hedged_opposite_on_the_second_venue() {
    let mut c = coordinator();
    c.on_maker_fill(Side::Buy, 2.0, 100.0, "fill-1".to_string());
    c.drain_pending().await.unwrap();
    let drift = c.reconcile().await.unwrap();
    // Maker is +2 net long (only tracked externally in this test scenario,
    // not mirrored into the sim's own position book), so reconcile measures
    // drift against the hedge venue's -2.0 from the placed hedge order.
    assert_eq!(drift.hedge_pos.net_size, -2.0);
}

#[tokio::test]
async fn multiple_queued_fills_drain_in_order_without_losing_any() {
    let mut c = coordinator();
    c.on_maker_fill(Side::Buy, 1.0, 100.0, "fill-1".to_string());
    c.on_maker_fill(Side::Sell, 0.5, 100.5, "fill-2".to_string());
    assert_eq!(c.pending_count(), 2);
    c.drain_pending().await.unwrap();
    assert_eq!(c.pending_count(), 0);
}
