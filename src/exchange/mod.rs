//! Exchange Adapter Layer (component D). `ExchangeClient` is the capability
//! interface every venue implements; per-venue quirks live behind the trait,
//! never behind `hasattr`-style runtime probing (spec §9).

pub mod sim;
pub mod types;
pub mod venue;

use crate::errors::EngineResult;
use async_trait::async_trait;
use types::{OrderInfo, OrderResult, PositionSnapshot, Side};

/// Callback invoked for every private order-stream update. Must be
/// reentrant-safe: the adapter may call it from a WS reader task while the
/// lifecycle engine concurrently polls REST for the same order.
pub type OrderUpdateHandler = std::sync::Arc<dyn Fn(OrderUpdate) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub status: types::OrderStatus,
    pub filled_size: f64,
    pub price: f64,
    pub side: Side,
    pub order_role: types::OrderRole,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn venue_name(&self) -> &str;

    async fn connect(&mut self) -> EngineResult<()>;
    async fn disconnect(&mut self) -> EngineResult<()>;

    async fn fetch_contract_attributes(&mut self, ticker: &str) -> EngineResult<(String, f64)>;

    /// Returns (best_bid, best_ask). Prefers the order book mirror; falls
    /// back to REST only when the mirror isn't ready or is invalid (§4.2).
    async fn fetch_bbo(&self, contract_id: &str) -> EngineResult<(f64, f64)>;

    async fn fetch_order_book_from_api(
        &self,
        contract_id: &str,
        depth: usize,
    ) -> EngineResult<(f64, f64, Vec<(f64, f64)>)>;

    async fn place_open_order(
        &mut self,
        contract_id: &str,
        qty: f64,
        price: f64,
        direction: Side,
        client_order_id: &str,
    ) -> EngineResult<OrderResult>;

    /// MUST be reduce-only AND post-only (spec §4.1 normalisation rule).
    async fn place_close_order(
        &mut self,
        contract_id: &str,
        qty: f64,
        price: f64,
        side: Side,
        client_order_id: &str,
    ) -> EngineResult<OrderResult>;

    async fn place_market_order(
        &mut self,
        contract_id: &str,
        qty: f64,
        side: Side,
        reduce_only: bool,
    ) -> EngineResult<OrderResult>;

    /// Idempotent: calling twice on an already-terminal order returns
    /// `success=true` with the same final `filled_size`.
    async fn cancel_order(&mut self, order_id: &str) -> EngineResult<OrderResult>;

    async fn get_order_info(&self, order_id_or_client_id: &str) -> EngineResult<OrderInfo>;

    /// Queries historical/inactive orders; NOT_FOUND before settlement propagates.
    async fn get_finalized_order_from_api(&self, order_id: &str) -> EngineResult<OrderInfo>;

    /// Empty on transient API error — caller must treat that as "no data", not "flat".
    async fn get_active_orders(&self, contract_id: &str) -> EngineResult<Vec<OrderInfo>>;

    async fn get_account_positions(&self, contract_id: &str) -> EngineResult<PositionSnapshot>;

    fn subscribe_order_stream(&mut self, handler: OrderUpdateHandler);

    fn round_to_tick(&self, price: f64, tick_size: f64) -> f64;

    fn tick_size(&self, contract_id: &str) -> f64;
}
