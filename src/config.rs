//! Configuration tree for models and their rate limiters.
//!
//! A [`ModelConfig`] names a model and carries an ordered list of
//! [`LimiterConfig`] entries; the order is the order in which the limiter
//! chain acquires capacity. Zero limiters is legal (the model is
//! unconstrained), and duplicate kinds are legal and additive: both apply.
//!
//! ### Example
//!
//! ```rust
//! use llm_fanout::config::{LimiterConfig, ModelConfig};
//!
//! let config = ModelConfig::new("claude-sonnet")
//!     .with_limiter(LimiterConfig::rpm(500))
//!     .with_limiter(LimiterConfig::tpm(80_000))
//!     .with_limiter(LimiterConfig::concurrent(8));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.limiters.len(), 3);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::request::TokenCounts;

/// Seconds in the default per-minute window.
const MINUTE_WINDOW_SECS: u64 = 60;
/// Seconds in the default per-day window.
const DAY_WINDOW_SECS: u64 = 86_400;

/// The dimension a rate limiter guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterKind {
    /// Requests per minute.
    Rpm,
    /// Requests per day.
    Rpd,
    /// Total tokens (input + output) per minute.
    Tpm,
    /// Total tokens (input + output) per day.
    Tpd,
    /// Input tokens per minute.
    Itpm,
    /// Output tokens per minute.
    Otpm,
    /// Maximum in-flight requests. Not windowed.
    Concurrent,
}

impl LimiterKind {
    /// The default window for this kind: 60s for the per-minute kinds,
    /// 86400s for the per-day kinds, none for `Concurrent`.
    pub fn default_window(&self) -> Option<Duration> {
        match self {
            Self::Rpm | Self::Tpm | Self::Itpm | Self::Otpm => {
                Some(Duration::from_secs(MINUTE_WINDOW_SECS))
            }
            Self::Rpd | Self::Tpd => Some(Duration::from_secs(DAY_WINDOW_SECS)),
            Self::Concurrent => None,
        }
    }

    /// Whether this kind charges token costs rather than request counts.
    pub fn is_token_based(&self) -> bool {
        matches!(self, Self::Tpm | Self::Tpd | Self::Itpm | Self::Otpm)
    }

    /// Projects a request's token counts onto this limiter's cost dimension:
    /// 1 for request-count and concurrency limiters, `input + output` for
    /// total-token limiters, and the single side for ITPM/OTPM.
    pub fn cost(&self, tokens: TokenCounts) -> u64 {
        match self {
            Self::Rpm | Self::Rpd | Self::Concurrent => 1,
            Self::Tpm | Self::Tpd => tokens.total(),
            Self::Itpm => tokens.input,
            Self::Otpm => tokens.output,
        }
    }
}

/// Configuration for a single rate limiter in a model's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// The dimension being limited.
    pub kind: LimiterKind,
    /// Maximum capacity within the window (or maximum in-flight requests).
    pub limit: u64,
    /// Window length override in seconds. `None` selects the kind's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
}

impl LimiterConfig {
    pub fn new(kind: LimiterKind, limit: u64) -> Self {
        Self {
            kind,
            limit,
            window_secs: None,
        }
    }

    /// Requests-per-minute limiter.
    pub fn rpm(limit: u64) -> Self {
        Self::new(LimiterKind::Rpm, limit)
    }

    /// Requests-per-day limiter.
    pub fn rpd(limit: u64) -> Self {
        Self::new(LimiterKind::Rpd, limit)
    }

    /// Total-tokens-per-minute limiter.
    pub fn tpm(limit: u64) -> Self {
        Self::new(LimiterKind::Tpm, limit)
    }

    /// Total-tokens-per-day limiter.
    pub fn tpd(limit: u64) -> Self {
        Self::new(LimiterKind::Tpd, limit)
    }

    /// Input-tokens-per-minute limiter.
    pub fn itpm(limit: u64) -> Self {
        Self::new(LimiterKind::Itpm, limit)
    }

    /// Output-tokens-per-minute limiter.
    pub fn otpm(limit: u64) -> Self {
        Self::new(LimiterKind::Otpm, limit)
    }

    /// Concurrency limiter.
    pub fn concurrent(limit: u64) -> Self {
        Self::new(LimiterKind::Concurrent, limit)
    }

    /// Overrides the window length. Rejected by `validate` on `Concurrent`
    /// limiters, which have no window.
    pub fn with_window_secs(mut self, window_secs: u64) -> Self {
        self.window_secs = Some(window_secs);
        self
    }

    /// The effective window, applying the kind's default when unset.
    pub fn window(&self) -> Option<Duration> {
        match self.window_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self.kind.default_window(),
        }
    }

    /// Checks the invariants: `limit >= 1`, explicit windows `>= 1` second,
    /// and no window on `Concurrent`.
    pub fn validate(&self) -> Result<()> {
        if self.limit < 1 {
            return Err(QueueError::invalid_configuration(format!(
                "{:?} limiter: limit must be >= 1, got {}",
                self.kind, self.limit
            )));
        }
        match (self.kind, self.window_secs) {
            (LimiterKind::Concurrent, Some(_)) => Err(QueueError::invalid_configuration(
                "concurrent limiter does not take a window",
            )),
            (_, Some(0)) => Err(QueueError::invalid_configuration(format!(
                "{:?} limiter: window_secs must be >= 1",
                self.kind
            ))),
            _ => Ok(()),
        }
    }
}

/// Configuration for one registered model: its id and the ordered limiter
/// chain that guards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Unique identifier of the model.
    pub model_id: String,
    /// Ordered limiter chain. Empty means unconstrained.
    #[serde(default)]
    pub limiters: Vec<LimiterConfig>,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            limiters: Vec::new(),
        }
    }

    /// Appends a limiter to the chain, preserving acquisition order.
    pub fn with_limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiters.push(limiter);
        self
    }

    /// Checks the model id and every limiter configuration.
    pub fn validate(&self) -> Result<()> {
        if self.model_id.is_empty() {
            return Err(QueueError::invalid_configuration(
                "model_id must not be empty",
            ));
        }
        for limiter in &self.limiters {
            limiter.validate()?;
        }
        Ok(())
    }
}
