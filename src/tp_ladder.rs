//! Two-phase take-profit pricing ladder (spec §4.4). Phase one posts a
//! passive reduce-only limit at the configured take-profit offset; every
//! `CanceledPostOnly`/`CanceledMargin` observed on that order advances the
//! ladder one tick closer to the market. After `max_attempts` the phase-one
//! ladder is exhausted and the caller switches to phase two: pricing
//! referenced off the live BBO rather than the fixed entry price, growing
//! more aggressive each attempt, refreshing the BBO every two attempts.
//! Once phase two is also exhausted the caller falls back to a marketable
//! order to guarantee the position actually closes.
//!
//! Grounded on `original_source/trading_bot_tick.py`'s take-profit retry
//! loop: phase one shrinks a fixed offset by one tick per attempt, and on
//! exhaustion phase two reprices against `ask`/`bid` scaled by `k * tp%`
//! (or `k` ticks in tick mode) for `k` in `1..=5`.

use crate::exchange::types::{Offset, OrderStatus, Side};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpLadderStep {
    pub attempt: usize,
    pub price: f64,
}

pub struct TpLadder {
    entry_price: f64,
    close_side: Side,
    tick_size: f64,
    base_offset: Offset,
    max_attempts: usize,
    attempt: usize,
}

impl TpLadder {
    pub fn new(entry_price: f64, close_side: Side, tick_size: f64, base_offset: Offset, max_attempts: usize) -> Self {
        Self {
            entry_price,
            close_side,
            tick_size,
            base_offset,
            max_attempts: max_attempts.max(1),
            attempt: 0,
        }
    }

    pub fn close_side(&self) -> Side {
        self.close_side
    }

    pub fn tick_size(&self) -> f64 {
        self.tick_size
    }

    pub fn base_offset(&self) -> Offset {
        self.base_offset
    }

    fn offset_distance(&self) -> f64 {
        match self.base_offset {
            Offset::Ticks(ticks) => ticks as f64 * self.tick_size,
            Offset::Percent(pct) => self.entry_price * pct,
        }
    }

    /// Distance from `entry_price` at the current attempt: the base offset,
    /// shrunk by one tick per retry, floored at one tick so the ladder never
    /// crosses into a guaranteed-loss price.
    fn current_distance(&self) -> f64 {
        let shrink = self.attempt as f64 * self.tick_size;
        (self.offset_distance() - shrink).max(self.tick_size)
    }

    pub fn current_step(&self) -> TpLadderStep {
        let distance = self.current_distance();
        let price = match self.close_side {
            Side::Sell => self.entry_price + distance,
            Side::Buy => self.entry_price - distance,
        };
        let price = (price / self.tick_size).round() * self.tick_size;
        TpLadderStep {
            attempt: self.attempt,
            price,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Call after an order placed at `current_step()` comes back with
    /// `status`. Returns `true` if the ladder has another attempt left
    /// (the caller should re-place at the new `current_step()`), or
    /// `false` once it's exhausted or `status` wasn't a ladder-advance
    /// outcome at all.
    pub fn advance(&mut self, status: OrderStatus) -> bool {
        if !status.is_post_only_or_margin_cancel() {
            return false;
        }
        self.attempt += 1;
        !self.is_exhausted()
    }
}

/// Phase two of the take-profit ladder: prices referenced off the live BBO
/// rather than the fixed entry price, scaling more aggressive with each
/// attempt so the close is guaranteed to eventually cross (spec §4.4 phase
/// two).
pub struct MarketReferencedLadder {
    close_side: Side,
    tick_size: f64,
    base_offset: Offset,
    max_attempts: usize,
    attempt: usize,
    last_refresh: usize,
}

impl MarketReferencedLadder {
    pub fn new(close_side: Side, tick_size: f64, base_offset: Offset, max_attempts: usize) -> Self {
        Self {
            close_side,
            tick_size,
            base_offset,
            max_attempts: max_attempts.max(1),
            attempt: 0,
            last_refresh: 0,
        }
    }

    /// Price for the k-th attempt (1-indexed), referenced off the supplied
    /// BBO: `ask * (1 + k * tp%)` for a sell close / `bid * (1 - k * tp%)`
    /// for a buy close, or the tick-mode equivalent.
    fn price_for_attempt(&self, k: usize, bid: f64, ask: f64) -> f64 {
        match self.base_offset {
            Offset::Ticks(ticks) => {
                let distance = self.tick_size * ticks as f64 * k as f64;
                match self.close_side {
                    Side::Sell => ask + distance,
                    Side::Buy => bid - distance,
                }
            }
            Offset::Percent(pct) => {
                let multiplier = pct * k as f64;
                match self.close_side {
                    Side::Sell => ask * (1.0 + multiplier),
                    Side::Buy => bid * (1.0 - multiplier),
                }
            }
        }
    }

    pub fn current_step(&self, bid: f64, ask: f64) -> TpLadderStep {
        let raw = self.price_for_attempt(self.attempt + 1, bid, ask);
        TpLadderStep {
            attempt: self.attempt,
            price: (raw / self.tick_size).round() * self.tick_size,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// BBO is refreshed on the first attempt and every two attempts after
    /// that, not on every retry.
    pub fn should_refresh_bbo(&self) -> bool {
        self.attempt == 0 || (self.attempt - self.last_refresh) >= 2
    }

    pub fn note_bbo_refreshed(&mut self) {
        self.last_refresh = self.attempt;
    }

    pub fn advance(&mut self, status: OrderStatus) -> bool {
        if !status.is_post_only_or_margin_cancel() {
            return false;
        }
        self.attempt += 1;
        !self.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_uses_the_full_offset() {
        let ladder = TpLadder::new(100.0, Side::Sell, 0.5, Offset::Ticks(10), 3);
        let step = ladder.current_step();
        assert_eq!(step.price, 105.0);
    }

    #[test]
    fn advancing_on_post_only_cancel_tightens_the_price() {
        let mut ladder = TpLadder::new(100.0, Side::Sell, 0.5, Offset::Ticks(10), 3);
        assert!(ladder.advance(OrderStatus::CanceledPostOnly));
        let next = ladder.current_step();
        assert!(next.price < 105.0);
        assert_eq!(next.attempt, 1);
    }

    #[test]
    fn ladder_exhausts_after_max_attempts() {
        let mut ladder = TpLadder::new(100.0, Side::Sell, 0.5, Offset::Ticks(2), 2);
        assert!(ladder.advance(OrderStatus::CanceledPostOnly));
        assert!(!ladder.advance(OrderStatus::CanceledPostOnly));
        assert!(ladder.is_exhausted());
    }

    #[test]
    fn non_cancel_statuses_do_not_advance() {
        let mut ladder = TpLadder::new(100.0, Side::Sell, 0.5, Offset::Ticks(10), 3);
        assert!(!ladder.advance(OrderStatus::Rejected));
        assert_eq!(ladder.current_step().attempt, 0);
    }

    #[test]
    fn buy_side_close_ladders_downward() {
        let ladder = TpLadder::new(100.0, Side::Buy, 0.5, Offset::Ticks(10), 3);
        let step = ladder.current_step();
        assert_eq!(step.price, 95.0);
    }

    #[test]
    fn phase_two_scales_with_k_and_refreshes_every_two_attempts() {
        let mut ladder = MarketReferencedLadder::new(Side::Sell, 0.5, Offset::Percent(0.005), 5);
        assert!(ladder.should_refresh_bbo());
        let first = ladder.current_step(99.5, 100.5);
        assert_eq!(first.price, (100.5_f64 * 1.005 / 0.5).round() * 0.5);
        ladder.note_bbo_refreshed();
        assert!(ladder.advance(OrderStatus::CanceledPostOnly));
        assert!(!ladder.should_refresh_bbo());
        assert!(ladder.advance(OrderStatus::CanceledPostOnly));
        assert!(ladder.should_refresh_bbo());
        let third = ladder.current_step(99.5, 100.5);
        assert_eq!(third.price, (100.5_f64 * (1.0 + 0.005 * 3.0) / 0.5).round() * 0.5);
    }

    #[test]
    fn phase_two_buy_side_reprices_below_bid() {
        let ladder = MarketReferencedLadder::new(Side::Buy, 0.5, Offset::Ticks(4), 5);
        let step = ladder.current_step(99.5, 100.5);
        assert_eq!(step.price, 99.5 - 0.5 * 4.0);
    }
}
