//! Client-side request budget for one node endpoint.
//!
//! A token bucket: `burst` requests may go out back to back, after which
//! requests are admitted at `per_second`. Uses tokio's clock so paused-time
//! tests are deterministic.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Requests that may be sent without waiting.
    pub burst: f64,
    /// Sustained requests per second.
    pub per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            burst: 50.0,
            per_second: 25.0,
        }
    }
}

#[derive(Debug)]
struct Budget {
    available: f64,
    updated: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    budget: Mutex<Budget>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            budget: Mutex::new(Budget {
                available: config.burst,
                updated: Instant::now(),
            }),
            config,
        }
    }

    /// Takes one request slot now, or returns how long until one frees up.
    pub fn reserve(&self) -> Result<(), Duration> {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let earned = now.duration_since(budget.updated).as_secs_f64() * self.config.per_second;
        budget.available = (budget.available + earned).min(self.config.burst);
        budget.updated = now;

        if budget.available >= 1.0 {
            budget.available -= 1.0;
            Ok(())
        } else if self.config.per_second <= 0.0 {
            Err(Duration::from_secs(1))
        } else {
            Err(Duration::from_secs_f64((1.0 - budget.available) / self.config.per_second))
        }
    }

    /// Waits until a request slot is available and takes it.
    pub async fn acquire(&self) {
        while let Err(wait) = self.reserve() {
            let wait = wait.max(Duration::from_millis(1));
            tracing::debug!(wait_ms = wait.as_millis() as u64, "request budget exhausted, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(burst: f64, per_second: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig { burst, per_second })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_wait() {
        let rl = limiter(3.0, 10.0);
        for _ in 0..3 {
            assert!(rl.reserve().is_ok());
        }
        let wait = rl.reserve().unwrap_err();
        assert_eq!(wait.as_millis(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_refills_over_time() {
        let rl = limiter(2.0, 4.0);
        rl.reserve().unwrap();
        rl.reserve().unwrap();
        assert!(rl.reserve().is_err());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(rl.reserve().is_ok());
        assert!(rl.reserve().is_err());

        // never refills past the burst
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(rl.reserve().is_ok());
        assert!(rl.reserve().is_ok());
        assert!(rl.reserve().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_sleeps_for_the_deficit() {
        let rl = limiter(1.0, 2.0);
        let started = Instant::now();
        rl.acquire().await;
        rl.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
