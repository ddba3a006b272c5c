//! Token-cost limiter over a rolling time window (TPM, TPD, ITPM, OTPM).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::config::LimiterKind;
use crate::error::{QueueError, Result};
use crate::limit::RateLimiter;

#[derive(Debug)]
struct Entry {
    request_id: String,
    admitted_at: Instant,
    cost: u64,
}

/// Sums token cost within the past window.
///
/// Each admission is recorded as an entry tagged with its request id, so the
/// estimated cost can later be replaced by the actual one (`adjust`) or the
/// whole reservation refunded (`release`) while it is still inside the
/// window. Entries are recorded even at zero cost: a request admitted on a
/// missing estimate must still have an entry for reconciliation to land on.
///
/// `adjust` to a larger cost records overage without retroactive blocking,
/// so `usage` may transiently exceed `limit`; subsequent admissions see the
/// inflated sum and wait it out.
#[derive(Debug)]
pub struct TokenWindow {
    kind: LimiterKind,
    limit: u64,
    window: Duration,
    entries: Mutex<VecDeque<Entry>>,
    freed: Notify,
}

impl TokenWindow {
    pub fn new(kind: LimiterKind, limit: u64, window: Duration) -> Self {
        debug_assert!(kind.is_token_based());
        Self {
            kind,
            limit,
            window,
            entries: Mutex::new(VecDeque::new()),
            freed: Notify::new(),
        }
    }

    fn evict(entries: &mut VecDeque<Entry>, now: Instant, window: Duration) {
        while let Some(oldest) = entries.front() {
            if now.duration_since(oldest.admitted_at) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn used(entries: &VecDeque<Entry>) -> u64 {
        entries.iter().map(|entry| entry.cost).sum()
    }

    fn over_limit_error(&self, cost: u64) -> QueueError {
        QueueError::invalid_configuration(format!(
            "{:?} limiter: cost {} can never fit within limit {}",
            self.kind, cost, self.limit
        ))
    }
}

#[async_trait]
impl RateLimiter for TokenWindow {
    fn kind(&self) -> LimiterKind {
        self.kind
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn window(&self) -> Option<Duration> {
        Some(self.window)
    }

    fn try_acquire(&self, request_id: &str, cost: u64) -> Result<bool> {
        if cost > self.limit {
            return Err(self.over_limit_error(cost));
        }
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        Self::evict(&mut entries, now, self.window);
        if Self::used(&entries) + cost <= self.limit {
            entries.push_back(Entry {
                request_id: request_id.to_string(),
                admitted_at: now,
                cost,
            });
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn acquire(&self, request_id: &str, cost: u64) -> Result<()> {
        if cost > self.limit {
            return Err(self.over_limit_error(cost));
        }
        loop {
            let deadline = {
                let mut entries = self.entries.lock().unwrap();
                let now = Instant::now();
                Self::evict(&mut entries, now, self.window);
                let used = Self::used(&entries);
                if used + cost <= self.limit {
                    entries.push_back(Entry {
                        request_id: request_id.to_string(),
                        admitted_at: now,
                        cost,
                    });
                    return Ok(());
                }
                // earliest instant at which enough recorded cost has aged out
                let needed = used + cost - self.limit;
                let mut released = 0u64;
                let mut deadline = now + self.window;
                for entry in entries.iter() {
                    released += entry.cost;
                    if released >= needed {
                        deadline = entry.admitted_at + self.window;
                        break;
                    }
                }
                deadline
            };
            // a release or downward adjust can free capacity before the deadline
            tokio::select! {
                _ = time::sleep_until(deadline) => {}
                _ = self.freed.notified() => {}
            }
        }
    }

    fn release(&self, request_id: &str, _cost: u64) {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|entry| entry.request_id != request_id);
        if entries.len() != before {
            self.freed.notify_one();
        }
    }

    fn adjust(&self, request_id: &str, new_cost: u64) {
        let mut entries = self.entries.lock().unwrap();
        Self::evict(&mut entries, Instant::now(), self.window);
        if let Some(entry) = entries
            .iter_mut()
            .find(|entry| entry.request_id == request_id)
        {
            let shrank = new_cost < entry.cost;
            entry.cost = new_cost;
            if shrank {
                self.freed.notify_one();
            }
        }
    }

    fn usage(&self) -> u64 {
        let mut entries = self.entries.lock().unwrap();
        Self::evict(&mut entries, Instant::now(), self.window);
        Self::used(&entries)
    }

    fn capacity(&self) -> u64 {
        self.limit.saturating_sub(self.usage())
    }
}
