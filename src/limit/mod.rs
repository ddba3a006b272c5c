//! # Rate Limiting Primitives
//!
//! This module provides the admission primitives the scheduler composes per
//! model. Each limiter guards one dimension of one resource limit and
//! presents the same capability surface, so the chain can treat them
//! uniformly:
//!
//! - **[`RequestWindow`]**: admissions counted over a rolling time window
//!   (RPM, RPD).
//! - **[`TokenWindow`]**: token cost summed over a rolling time window
//!   (TPM, TPD, ITPM, OTPM).
//! - **[`Concurrency`]**: maximum in-flight requests, no window.
//!
//! The [`RateLimiter`] trait is the seam: `try_acquire` is the non-blocking
//! probe, `acquire` suspends until the cost is admissible, `release` refunds
//! a reservation on rollback paths, and `adjust` reconciles an estimated
//! cost against the actual one after processing. `usage`/`capacity`/
//! `snapshot` expose observability.
//!
//! Limiters are built from [`LimiterConfig`] through [`build_limiter`];
//! ordering and composition live in [`chain`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{LimiterConfig, LimiterKind};
use crate::error::Result;

pub mod chain;
mod concurrency;
mod request_window;
mod token_window;

pub use concurrency::Concurrency;
pub use request_window::RequestWindow;
pub use token_window::TokenWindow;

/// A point-in-time view of one limiter, reported through
/// [`QueueInfo`](crate::queue::QueueInfo).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterSnapshot {
    pub kind: LimiterKind,
    pub limit: u64,
    pub usage: u64,
    pub capacity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
}

/// The uniform capability surface of every admission primitive.
///
/// `cost` is a non-negative integer whose meaning depends on the variant:
/// an admission count for request windows and concurrency, a token count
/// for token windows. `request_id` tags windowed reservations so they can
/// be reconciled or refunded later; variants that do not track per-request
/// state ignore it.
#[async_trait]
pub trait RateLimiter: fmt::Debug + Send + Sync {
    /// The dimension this limiter guards.
    fn kind(&self) -> LimiterKind;

    /// The configured capacity.
    fn limit(&self) -> u64;

    /// The rolling window, or `None` for un-windowed limiters.
    fn window(&self) -> Option<Duration> {
        None
    }

    /// Attempts to admit `cost` without waiting. Returns `Ok(false)` when
    /// capacity is currently exhausted and an error when `cost` could never
    /// fit (`cost > limit`).
    fn try_acquire(&self, request_id: &str, cost: u64) -> Result<bool>;

    /// Suspends until `cost` is admissible, then records it. Fails fast
    /// with `InvalidConfiguration` when `cost > limit`, since waiting could
    /// never succeed.
    async fn acquire(&self, request_id: &str, cost: u64) -> Result<()>;

    /// Refunds a recorded admission. Used on rollback paths when the caller
    /// deems the reservation invalid; request windows treat this as a no-op
    /// because admissions are not reversible.
    fn release(&self, request_id: &str, cost: u64);

    /// Replaces the recorded cost for `request_id` with `new_cost`
    /// (reconciliation). A no-op for variants without per-request records
    /// and for entries that have already aged out of the window.
    fn adjust(&self, request_id: &str, new_cost: u64);

    /// Capacity currently consumed.
    fn usage(&self) -> u64;

    /// Capacity currently available.
    fn capacity(&self) -> u64;

    /// The observability record for this limiter.
    fn snapshot(&self) -> LimiterSnapshot {
        LimiterSnapshot {
            kind: self.kind(),
            limit: self.limit(),
            usage: self.usage(),
            capacity: self.capacity(),
            window_secs: self.window().map(|w| w.as_secs()),
        }
    }
}

/// Builds the limiter a configuration entry describes, validating it first.
pub fn build_limiter(config: &LimiterConfig) -> Result<Arc<dyn RateLimiter>> {
    config.validate()?;
    let limiter: Arc<dyn RateLimiter> = match config.kind {
        LimiterKind::Concurrent => Arc::new(Concurrency::new(config.limit)),
        kind => {
            let window = config
                .window()
                .expect("windowed kinds always resolve a window");
            if kind.is_token_based() {
                Arc::new(TokenWindow::new(kind, config.limit, window))
            } else {
                Arc::new(RequestWindow::new(kind, config.limit, window))
            }
        }
    };
    Ok(limiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_builds_each_variant() {
        let rpm = build_limiter(&LimiterConfig::rpm(10)).unwrap();
        assert_eq!(rpm.kind(), LimiterKind::Rpm);
        assert_eq!(rpm.window(), Some(Duration::from_secs(60)));

        let tpd = build_limiter(&LimiterConfig::tpd(1_000_000)).unwrap();
        assert_eq!(tpd.kind(), LimiterKind::Tpd);
        assert_eq!(tpd.window(), Some(Duration::from_secs(86_400)));

        let concurrent = build_limiter(&LimiterConfig::concurrent(4)).unwrap();
        assert_eq!(concurrent.kind(), LimiterKind::Concurrent);
        assert_eq!(concurrent.window(), None);
    }

    #[test]
    fn test_factory_rejects_invalid_configs() {
        assert!(build_limiter(&LimiterConfig::rpm(0)).is_err());
        assert!(build_limiter(&LimiterConfig::tpm(100).with_window_secs(0)).is_err());
    }

    #[test]
    fn test_snapshot_shape() {
        let limiter = build_limiter(&LimiterConfig::itpm(500).with_window_secs(30)).unwrap();
        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.kind, LimiterKind::Itpm);
        assert_eq!(snapshot.limit, 500);
        assert_eq!(snapshot.usage, 0);
        assert_eq!(snapshot.capacity, 500);
        assert_eq!(snapshot.window_secs, Some(30));
    }
}
