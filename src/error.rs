//! # Error Handling for the Scheduler
//!
//! This module defines the centralized error handling system for the crate.
//! It provides a unified `Result` type and a `QueueError` enum that covers
//! every failure surfaced by the scheduler core, from lookup errors to
//! shutdown races.
//!
//! ## The `QueueError` Enum
//!
//! [`QueueError`] is the primary error type used throughout the crate. The
//! use of `thiserror` keeps the display strings descriptive and the variants
//! structured enough to match on.
//!
//! Note that a processor failing is *not* surfaced through this type on the
//! submission path: the worker captures processor errors into a `Failed`
//! response instead (see [`crate::queue::ModelQueue`]). The
//! [`QueueError::Processing`] variant exists for callers that want to lift a
//! failed response back into an error.
//!
//! ## The `Result` Type Alias
//!
//! For convenience, this module provides a `Result<T>` alias, shorthand for
//! `std::result::Result<T, QueueError>`.
//!
//! ### Example
//!
//! ```rust
//! use llm_fanout::error::{QueueError, Result};
//!
//! fn check_model(model_id: &str) -> Result<()> {
//!     if model_id.is_empty() {
//!         Err(QueueError::invalid_configuration("model_id must not be empty"))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! assert!(check_model("claude-sonnet").is_ok());
//! let err = check_model("").unwrap_err();
//! assert_eq!(
//!     err.to_string(),
//!     "invalid configuration: model_id must not be empty"
//! );
//! ```

use thiserror::Error;

/// A specialized `Result` type for scheduler operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// The error type for every fallible operation in the scheduler core.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A submission, status probe, or usage update named a model that was
    /// never registered (or has been removed by `shutdown_all`).
    #[error("model '{model_id}' is not registered")]
    ModelNotRegistered { model_id: String },

    /// A configuration was rejected: duplicate model registration, a
    /// non-positive limit or window, or a request whose token cost alone can
    /// never fit inside a limiter's capacity.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A non-blocking admission attempt found no capacity. The waiting
    /// admission path never raises this; it sleeps instead.
    #[error("rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// The target queue has begun shutting down and refuses new work, or a
    /// pending request was terminated by shutdown before it could complete.
    #[error("queue for model '{model_id}' is shut down")]
    QueueShutdown { model_id: String },

    /// A processor failure, captured into a `Failed` response by the worker.
    #[error("processing failed: {message}")]
    Processing { message: String },
}

impl QueueError {
    /// Creates a [`QueueError::ModelNotRegistered`] for the given model id.
    pub fn model_not_registered(model_id: impl Into<String>) -> Self {
        Self::ModelNotRegistered {
            model_id: model_id.into(),
        }
    }

    /// Creates a [`QueueError::InvalidConfiguration`] with the given message.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Creates a [`QueueError::RateLimitExceeded`] with the given message.
    pub fn rate_limit_exceeded(message: impl Into<String>) -> Self {
        Self::RateLimitExceeded {
            message: message.into(),
        }
    }

    /// Creates a [`QueueError::QueueShutdown`] for the given model id.
    pub fn queue_shutdown(model_id: impl Into<String>) -> Self {
        Self::QueueShutdown {
            model_id: model_id.into(),
        }
    }

    /// Creates a [`QueueError::Processing`] with the given message.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    /// Returns `true` if this error was caused by queue shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::QueueShutdown { .. })
    }
}
