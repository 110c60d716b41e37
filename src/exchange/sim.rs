//! In-memory fake venue used by integration tests and dry-run mode.
//! Grounded on the teacher's `SimExchange`: orders fill immediately against
//! a fed mid price rather than resting, which is adequate for exercising
//! the lifecycle/reconcile/strategy layers without a network.

use super::{ExchangeClient, OrderUpdate, OrderUpdateHandler};
use crate::errors::{EngineError, EngineResult};
use crate::exchange::types::{Order, OrderInfo, OrderResult, OrderRole, OrderStatus, PositionSnapshot, Side};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct SimExchange {
    venue: String,
    contract_id: String,
    tick_size: f64,
    mid_price: f64,
    net_size: f64,
    avg_entry_price: f64,
    orders: HashMap<String, Order>,
    next_order_id: AtomicU64,
    handler: Option<OrderUpdateHandler>,
    /// When set, the next `place_open_order`/`place_close_order` call fails
    /// with this error instead of filling — lets tests exercise the reject path.
    pub fail_next: Option<EngineError>,
}

impl SimExchange {
    pub fn new(contract_id: impl Into<String>, tick_size: f64, mid_price: f64) -> Self {
        Self {
            venue: "sim".to_string(),
            contract_id: contract_id.into(),
            tick_size,
            mid_price,
            net_size: 0.0,
            avg_entry_price: 0.0,
            orders: HashMap::new(),
            next_order_id: AtomicU64::new(1),
            handler: None,
            fail_next: None,
        }
    }

    pub fn set_mid_price(&mut self, mid: f64) {
        self.mid_price = mid;
    }

    fn apply_fill(&mut self, side: Side, qty: f64, price: f64) {
        let signed_qty = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        let new_size = self.net_size + signed_qty;
        if self.net_size.signum() == new_size.signum() || self.net_size == 0.0 {
            let total_cost = self.avg_entry_price.abs() * self.net_size.abs() + price * qty;
            let total_qty = self.net_size.abs() + qty;
            self.avg_entry_price = if total_qty > 0.0 { total_cost / total_qty } else { 0.0 };
        } else if new_size.abs() < self.net_size.abs() {
            // partial close: avg entry unchanged
        } else {
            self.avg_entry_price = price;
        }
        self.net_size = new_size;
    }

    fn emit(&self, order: &Order) {
        if let Some(h) = &self.handler {
            h(OrderUpdate {
                order_id: order.order_id.clone(),
                client_order_id: Some(order.client_order_id.clone()),
                status: order.status,
                filled_size: order.filled_size,
                price: order.price,
                side: order.side,
                order_role: order.order_role,
            });
        }
    }

    fn fresh_order_id(&self) -> String {
        format!("sim-{}", self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }

    fn place(
        &mut self,
        qty: f64,
        price: f64,
        side: Side,
        role: OrderRole,
        reduce_only: bool,
        post_only: bool,
        client_order_id: &str,
    ) -> EngineResult<OrderResult> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }

        let crosses = match side {
            Side::Buy => price >= self.mid_price,
            Side::Sell => price <= self.mid_price,
        };

        let order_id = self.fresh_order_id();
        let mut order = Order {
            order_id: order_id.clone(),
            client_order_id: client_order_id.to_string(),
            side,
            price,
            size: qty,
            filled_size: 0.0,
            status: OrderStatus::Open,
            order_role: role,
            reduce_only,
            post_only,
        };

        // A post-only order that would cross surfaces as a typed cancel
        // status, never as an `Err` — callers (the TP ladder, the
        // reconciler) branch on `status`, not on the error channel.
        if post_only && crosses {
            order.status = OrderStatus::CanceledPostOnly;
        } else if crosses {
            // A sim fill happens immediately if the resting price has
            // already been crossed by the current mid (mirrors an IOC/
            // marketable order).
            order.observe_filled_size(qty);
            order.status = OrderStatus::Filled;
            self.apply_fill(side, qty, price);
        }

        self.emit(&order);
        let result = OrderResult {
            success: order.status != OrderStatus::CanceledPostOnly,
            order_id: Some(order.order_id.clone()),
            client_order_id: Some(order.client_order_id.clone()),
            side: Some(order.side),
            size: Some(order.size),
            price: Some(order.price),
            status: Some(order.status),
            filled_size: Some(order.filled_size),
            error_message: if order.status == OrderStatus::CanceledPostOnly {
                Some("post-only order would cross the book".to_string())
            } else {
                None
            },
        };
        self.orders.insert(order_id, order);
        Ok(result)
    }
}

#[async_trait]
impl ExchangeClient for SimExchange {
    fn venue_name(&self) -> &str {
        &self.venue
    }

    async fn connect(&mut self) -> EngineResult<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> EngineResult<()> {
        Ok(())
    }

    async fn fetch_contract_attributes(&mut self, _ticker: &str) -> EngineResult<(String, f64)> {
        Ok((self.contract_id.clone(), self.tick_size))
    }

    async fn fetch_bbo(&self, _contract_id: &str) -> EngineResult<(f64, f64)> {
        Ok((self.mid_price - self.tick_size, self.mid_price + self.tick_size))
    }

    async fn fetch_order_book_from_api(&self, _contract_id: &str, _depth: usize) -> EngineResult<(f64, f64, Vec<(f64, f64)>)> {
        Ok((self.mid_price - self.tick_size, self.mid_price + self.tick_size, Vec::new()))
    }

    async fn place_open_order(&mut self, _contract_id: &str, qty: f64, price: f64, direction: Side, client_order_id: &str) -> EngineResult<OrderResult> {
        self.place(qty, price, direction, OrderRole::Open, false, true, client_order_id)
    }

    async fn place_close_order(&mut self, _contract_id: &str, qty: f64, price: f64, side: Side, client_order_id: &str) -> EngineResult<OrderResult> {
        self.place(qty, price, side, OrderRole::Close, true, true, client_order_id)
    }

    async fn place_market_order(&mut self, _contract_id: &str, qty: f64, side: Side, reduce_only: bool) -> EngineResult<OrderResult> {
        let price = self.mid_price;
        self.place(qty, price, side, OrderRole::Close, reduce_only, false, &self.fresh_order_id())
    }

    async fn cancel_order(&mut self, order_id: &str) -> EngineResult<OrderResult> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| EngineError::NotFound(order_id.to_string()))?;
        if !order.status.is_terminal() {
            order.status = OrderStatus::Canceled;
        }
        Ok(OrderResult {
            success: true,
            order_id: Some(order.order_id.clone()),
            client_order_id: Some(order.client_order_id.clone()),
            side: Some(order.side),
            size: Some(order.size),
            price: Some(order.price),
            status: Some(order.status),
            filled_size: Some(order.filled_size),
            error_message: None,
        })
    }

    async fn get_order_info(&self, order_id_or_client_id: &str) -> EngineResult<OrderInfo> {
        let order = self
            .orders
            .values()
            .find(|o| o.order_id == order_id_or_client_id || o.client_order_id == order_id_or_client_id)
            .ok_or_else(|| EngineError::NotFound(order_id_or_client_id.to_string()))?;
        Ok(OrderInfo {
            order_id: order.order_id.clone(),
            client_order_id: Some(order.client_order_id.clone()),
            side: order.side,
            price: order.price,
            size: order.size,
            filled_size: order.filled_size,
            status: order.status,
            order_role: order.order_role,
        })
    }

    async fn get_finalized_order_from_api(&self, order_id: &str) -> EngineResult<OrderInfo> {
        self.get_order_info(order_id).await
    }

    async fn get_active_orders(&self, _contract_id: &str) -> EngineResult<Vec<OrderInfo>> {
        Ok(self
            .orders
            .values()
            .filter(|o| o.status.is_open_ish())
            .map(|o| OrderInfo {
                order_id: o.order_id.clone(),
                client_order_id: Some(o.client_order_id.clone()),
                side: o.side,
                price: o.price,
                size: o.size,
                filled_size: o.filled_size,
                status: o.status,
                order_role: o.order_role,
            })
            .collect())
    }

    async fn get_account_positions(&self, _contract_id: &str) -> EngineResult<PositionSnapshot> {
        Ok(PositionSnapshot {
            venue: self.venue.clone(),
            ticker: self.contract_id.clone(),
            net_size: self.net_size,
            avg_entry_price: self.avg_entry_price,
            timestamp_ms: 0,
        })
    }

    fn subscribe_order_stream(&mut self, handler: OrderUpdateHandler) {
        self.handler = Some(handler);
    }

    fn round_to_tick(&self, price: f64, tick_size: f64) -> f64 {
        (price / tick_size).round() * tick_size
    }

    fn tick_size(&self, _contract_id: &str) -> f64 {
        self.tick_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marketable_open_order_fills_immediately() {
        let mut ex = SimExchange::new("BTC-PERP", 0.5, 100.0);
        let result = ex
            .place_open_order("BTC-PERP", 1.0, 101.0, Side::Buy, "c1")
            .await
            .unwrap();
        assert_eq!(result.status, Some(OrderStatus::Filled));
        let pos = ex.get_account_positions("BTC-PERP").await.unwrap();
        assert_eq!(pos.net_size, 1.0);
    }

    #[tokio::test]
    async fn post_only_order_crossing_the_book_is_rejected() {
        let mut ex = SimExchange::new("BTC-PERP", 0.5, 100.0);
        let result = ex.place_open_order("BTC-PERP", 1.0, 99.0, Side::Buy, "c1").await.unwrap();
        assert_eq!(result.status, Some(OrderStatus::CanceledPostOnly));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_a_terminal_order() {
        let mut ex = SimExchange::new("BTC-PERP", 0.5, 100.0);
        let placed = ex.place_open_order("BTC-PERP", 1.0, 98.0, Side::Buy, "c1").await.unwrap();
        let order_id = placed.order_id.unwrap();
        ex.cancel_order(&order_id).await.unwrap();
        let second = ex.cancel_order(&order_id).await.unwrap();
        assert!(second.success);
    }
}
