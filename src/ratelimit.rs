//! Rate Limiter (component B, spec §4.10). Throttles outbound venue calls to
//! stay under a per-venue requests-per-second budget and backs off further
//! on an observed `RateLimited` response.
//!
//! Grounded on the teacher's `execution.rs::OfiCalculator` sliding-window
//! `VecDeque` pattern, repurposed from trade-flow counting to call-rate
//! counting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    max_per_window: usize,
    window_len: Duration,
    backoff_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window_len: Duration) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            max_per_window,
            window_len,
            backoff_until: Mutex::new(None),
        }
    }

    /// Blocks until a slot is free, accounting both for the rolling request
    /// count and for any backoff set by `note_rate_limited`.
    pub async fn acquire(&self) {
        loop {
            let backoff_wait = {
                let until = self.backoff_until.lock().await;
                until.map(|t| t.saturating_duration_since(Instant::now()))
            };
            if let Some(wait) = backoff_wait {
                if !wait.is_zero() {
                    sleep(wait).await;
                    continue;
                }
            }

            let now = Instant::now();
            let mut window = self.window.lock().await;
            while let Some(&front) = window.front() {
                if now.duration_since(front) > self.window_len {
                    window.pop_front();
                } else {
                    break;
                }
            }
            if window.len() < self.max_per_window {
                window.push_back(now);
                return;
            }
            let wait = self.window_len.saturating_sub(now.duration_since(*window.front().unwrap()));
            drop(window);
            sleep(wait.max(Duration::from_millis(5))).await;
        }
    }

    /// Called after a venue responds with a rate-limit error. Imposes an
    /// exponential backoff window before any further `acquire()` proceeds.
    pub async fn note_rate_limited(&self, consecutive_hits: u32) {
        let backoff_ms = 500u64.saturating_mul(2u64.saturating_pow(consecutive_hits.min(6)));
        let mut until = self.backoff_until.lock().await;
        *until = Some(Instant::now() + Duration::from_millis(backoff_ms));
    }

    pub async fn clear_backoff(&self) {
        let mut until = self.backoff_until.lock().await;
        *until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_admits_calls_up_to_the_window_cap() {
        let limiter = RateLimiter::new(3, Duration::from_millis(200));
        for _ in 0..3 {
            limiter.acquire().await;
        }
        let window = limiter.window.lock().await;
        assert_eq!(window.len(), 3);
    }

    #[tokio::test]
    async fn note_rate_limited_sets_a_backoff_window() {
        let limiter = RateLimiter::new(10, Duration::from_secs(1));
        limiter.note_rate_limited(0).await;
        let until = limiter.backoff_until.lock().await;
        assert!(until.is_some());
    }
}
