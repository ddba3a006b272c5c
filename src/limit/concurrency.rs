//! Max-in-flight limiter backed by a counting semaphore.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::LimiterKind;
use crate::error::{QueueError, Result};
use crate::limit::RateLimiter;

/// Bounds the number of requests processing at once.
///
/// Permits are forgotten on acquisition and added back on `release`, so a
/// reservation survives across the whole processing span instead of being
/// tied to a guard's lifetime. Window-based operations do not apply:
/// `window()` is `None` and `adjust` is a no-op.
#[derive(Debug)]
pub struct Concurrency {
    limit: u64,
    semaphore: Semaphore,
}

impl Concurrency {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            semaphore: Semaphore::new(limit as usize),
        }
    }

    fn over_limit_error(&self, cost: u64) -> QueueError {
        QueueError::invalid_configuration(format!(
            "Concurrent limiter: {} slots can never fit within limit {}",
            cost, self.limit
        ))
    }
}

#[async_trait]
impl RateLimiter for Concurrency {
    fn kind(&self) -> LimiterKind {
        LimiterKind::Concurrent
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn window(&self) -> Option<Duration> {
        None
    }

    fn try_acquire(&self, _request_id: &str, cost: u64) -> Result<bool> {
        if cost > self.limit {
            return Err(self.over_limit_error(cost));
        }
        match self.semaphore.try_acquire_many(cost as u32) {
            Ok(permit) => {
                permit.forget();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn acquire(&self, _request_id: &str, cost: u64) -> Result<()> {
        if cost > self.limit {
            return Err(self.over_limit_error(cost));
        }
        let permit = self
            .semaphore
            .acquire_many(cost as u32)
            .await
            .expect("semaphore is never closed");
        permit.forget();
        Ok(())
    }

    fn release(&self, _request_id: &str, cost: u64) {
        self.semaphore.add_permits(cost as usize);
    }

    fn adjust(&self, _request_id: &str, _new_cost: u64) {}

    fn usage(&self) -> u64 {
        self.limit
            .saturating_sub(self.semaphore.available_permits() as u64)
    }

    fn capacity(&self) -> u64 {
        self.semaphore.available_permits() as u64
    }
}
