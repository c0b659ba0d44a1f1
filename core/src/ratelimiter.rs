//! Launch pacing shared by everything a batch starts.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Hands out at most `per_sec` permits per second. The first permit is immediate.
pub struct RateLimiter {
    ticker: Arc<Mutex<Interval>>,
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self { RateLimiter { ticker: self.ticker.clone() } }
}

impl RateLimiter {
    /// Must be called from within a tokio runtime.
    pub fn new(per_sec: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / per_sec.max(1) as f64).max(Duration::from_micros(1));
        let mut t = interval(period);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        RateLimiter { ticker: Arc::new(Mutex::new(t)) }
    }

    pub async fn acquire(&self) {
        self.ticker.lock().await.tick().await;
    }
}
