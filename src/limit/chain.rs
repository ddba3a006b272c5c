//! # Limiter Chain (orientation)
//!
//! A [`LimiterChain`] owns the ordered limiters guarding one model and
//! enforces all-or-nothing admission: a request holds every limiter or none
//! of them. It also brokers the reservation/reconciliation protocol for
//! estimated-vs-actual token costs and keeps the in-flight map of holds per
//! request.
//!
//! Acquisition is sequential in the configured order. All limiters are
//! local and in-process, token-window capacity is monotone under release,
//! and admission is serialized per chain by the single queue worker, so two
//! `acquire_all` calls never interleave and no multi-lock protocol is
//! needed. If an acquisition fails part-way (or the worker is cancelled
//! mid-wait during shutdown), a rollback guard releases the already-acquired
//! members in reverse order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::config::{LimiterConfig, LimiterKind};
use crate::error::Result;
use crate::limit::{build_limiter, LimiterSnapshot, RateLimiter};
use crate::request::TokenCounts;

/// One acquired reservation: which chain member and at what cost.
#[derive(Debug, Clone, Copy)]
struct Hold {
    index: usize,
    cost: u64,
}

/// The ordered set of limiters guarding one model.
#[derive(Debug)]
pub struct LimiterChain {
    limiters: Vec<Arc<dyn RateLimiter>>,
    in_flight: Mutex<HashMap<String, Vec<Hold>>>,
}

impl LimiterChain {
    pub fn new(limiters: Vec<Arc<dyn RateLimiter>>) -> Self {
        Self {
            limiters,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a chain from configuration entries, preserving their order.
    pub fn from_configs(configs: &[LimiterConfig]) -> Result<Self> {
        let limiters = configs
            .iter()
            .map(build_limiter)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(limiters))
    }

    /// Number of limiters in the chain.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// `true` when the model is unconstrained.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Number of requests currently holding reservations.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Waits until every limiter admits the request, acquiring them in
    /// configured order. Either all members end up held (and recorded in the
    /// in-flight map) or none: an error from any member, or cancellation of
    /// the returned future, releases the partial acquisition in reverse
    /// order.
    pub async fn acquire_all(&self, request_id: &str, estimate: TokenCounts) -> Result<()> {
        let mut rollback = Rollback {
            limiters: &self.limiters,
            request_id,
            acquired: Vec::with_capacity(self.limiters.len()),
        };
        for (index, limiter) in self.limiters.iter().enumerate() {
            let cost = limiter.kind().cost(estimate);
            trace!(request_id, kind = ?limiter.kind(), cost, "acquiring limiter");
            limiter.acquire(request_id, cost).await?;
            rollback.acquired.push(Hold { index, cost });
        }
        let holds = rollback.commit();
        self.in_flight
            .lock()
            .unwrap()
            .insert(request_id.to_string(), holds);
        debug!(request_id, limiters = self.limiters.len(), "admitted");
        Ok(())
    }

    /// Reconciles every token limiter against the actual counts. Limiters
    /// without per-request records are untouched; an unknown request id (or
    /// one whose window entries already aged out) is a no-op, so the call is
    /// idempotent and tolerant of late arrival.
    pub fn update_usage(&self, request_id: &str, actual: TokenCounts) {
        for limiter in &self.limiters {
            let kind = limiter.kind();
            if kind.is_token_based() {
                limiter.adjust(request_id, kind.cost(actual));
            }
        }
    }

    /// Drops the request's holds. Concurrency permits return immediately;
    /// windowed admissions stay recorded and age out of their windows on
    /// their own, which is what keeps RPM/TPM counting completed requests.
    pub fn release_all(&self, request_id: &str) {
        let holds = self.in_flight.lock().unwrap().remove(request_id);
        let Some(holds) = holds else {
            return;
        };
        for hold in holds.iter().rev() {
            let limiter = &self.limiters[hold.index];
            if limiter.kind() == LimiterKind::Concurrent {
                limiter.release(request_id, hold.cost);
            }
        }
        trace!(request_id, "released");
    }

    /// Per-member observability records, in chain order.
    pub fn snapshots(&self) -> Vec<LimiterSnapshot> {
        self.limiters.iter().map(|l| l.snapshot()).collect()
    }
}

/// Releases partially acquired limiters in reverse order unless committed.
struct Rollback<'a> {
    limiters: &'a [Arc<dyn RateLimiter>],
    request_id: &'a str,
    acquired: Vec<Hold>,
}

impl Rollback<'_> {
    fn commit(mut self) -> Vec<Hold> {
        std::mem::take(&mut self.acquired)
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        for hold in self.acquired.iter().rev() {
            self.limiters[hold.index].release(self.request_id, hold.cost);
        }
    }
}
