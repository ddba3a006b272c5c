//! Admission-count limiter over a rolling time window (RPM, RPD).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant};

use crate::config::LimiterKind;
use crate::error::{QueueError, Result};
use crate::limit::RateLimiter;

/// Counts admissions within the past window.
///
/// Internal state is the ordered record of admission timestamps that have
/// not yet aged out. Admissions are not reversible: `release` and `adjust`
/// are no-ops, so a request that was admitted keeps counting against the
/// window until it expires, whether or not it succeeded.
#[derive(Debug)]
pub struct RequestWindow {
    kind: LimiterKind,
    limit: u64,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RequestWindow {
    pub fn new(kind: LimiterKind, limit: u64, window: Duration) -> Self {
        Self {
            kind,
            limit,
            window,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    fn evict(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = admitted.front() {
            if now.duration_since(oldest) >= window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn over_limit_error(&self, cost: u64) -> QueueError {
        QueueError::invalid_configuration(format!(
            "{:?} limiter: admission of {} can never fit within limit {}",
            self.kind, cost, self.limit
        ))
    }
}

#[async_trait]
impl RateLimiter for RequestWindow {
    fn kind(&self) -> LimiterKind {
        self.kind
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn window(&self) -> Option<Duration> {
        Some(self.window)
    }

    fn try_acquire(&self, _request_id: &str, cost: u64) -> Result<bool> {
        if cost > self.limit {
            return Err(self.over_limit_error(cost));
        }
        if cost == 0 {
            return Ok(true);
        }
        let mut admitted = self.admitted.lock().unwrap();
        let now = Instant::now();
        Self::evict(&mut admitted, now, self.window);
        if admitted.len() as u64 + cost <= self.limit {
            for _ in 0..cost {
                admitted.push_back(now);
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn acquire(&self, _request_id: &str, cost: u64) -> Result<()> {
        if cost > self.limit {
            return Err(self.over_limit_error(cost));
        }
        if cost == 0 {
            return Ok(());
        }
        loop {
            let deadline = {
                let mut admitted = self.admitted.lock().unwrap();
                let now = Instant::now();
                Self::evict(&mut admitted, now, self.window);
                if admitted.len() as u64 + cost <= self.limit {
                    for _ in 0..cost {
                        admitted.push_back(now);
                    }
                    return Ok(());
                }
                // the oldest admission ages out first
                match admitted.front() {
                    Some(&oldest) => oldest + self.window,
                    None => now + self.window,
                }
            };
            time::sleep_until(deadline).await;
        }
    }

    fn release(&self, _request_id: &str, _cost: u64) {}

    fn adjust(&self, _request_id: &str, _new_cost: u64) {}

    fn usage(&self) -> u64 {
        let mut admitted = self.admitted.lock().unwrap();
        Self::evict(&mut admitted, Instant::now(), self.window);
        admitted.len() as u64
    }

    fn capacity(&self) -> u64 {
        self.limit.saturating_sub(self.usage())
    }
}
