//! # Core Data Structures for Request Scheduling
//!
//! This module defines the data model that flows through the scheduler: the
//! request a caller submits, the response the worker produces, and the token
//! accounting attached to both.
//!
//! ## Key Data Structures
//!
//! - **[`QueueRequest`]**: a single unit of work targeted at one model. The
//!   payload type `P` is opaque to the core; only the processor interprets
//!   it. Requests carry optional token *estimates* used for admission and
//!   optional *actuals* a processor can fill in for reconciliation.
//! - **[`QueueResponse`]**: the terminal (or, for fire-and-forget
//!   submissions, provisional) outcome of a request, with status, result or
//!   error, processing duration, and the token counts actually consumed.
//! - **[`RequestStatus`]**: the request lifecycle
//!   (`Pending → Processing → Completed | Failed`). Terminal states are
//!   absorbing.
//! - **[`TokenCounts`]**: an input/output token pair, the cost vector
//!   limiters charge against.
//!
//! All structures are serializable so they can be logged or shipped across
//! an application's own wire formats.
//!
//! ### Example: Building a Request
//!
//! ```rust
//! use llm_fanout::request::QueueRequest;
//!
//! let request = QueueRequest::new("claude-sonnet", "summarize this document")
//!     .with_estimates(900, 300)
//!     .fire_and_forget();
//!
//! assert_eq!(request.model_id, "claude-sonnet");
//! assert!(!request.wait_for_completion);
//! assert_eq!(request.token_estimate().total(), 1200);
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The lifecycle state of a queued request.
///
/// A request enters `Pending` on enqueue, becomes `Processing` the instant
/// the worker holds every limiter, and ends in `Completed` or `Failed` when
/// the processor returns. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Enqueued, not yet admitted by the limiter chain.
    Pending,
    /// Admitted; the processor is running.
    Processing,
    /// The processor returned a result.
    Completed,
    /// The processor returned an error, or shutdown terminated the request.
    Failed,
}

impl RequestStatus {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// An input/output token pair.
///
/// This is the cost vector the limiter chain projects per limiter: total
/// (`input + output`), input-only, or output-only depending on the limiter
/// kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
}

impl TokenCounts {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Combined input and output tokens.
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// A request to be processed by a model's queue.
///
/// The parameter payload `P` is treated as a black box by the core; it is
/// handed to the processor untouched. Token estimates drive admission
/// against token-window limiters; missing estimates count as zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRequest<P> {
    /// Unique request identifier, generated at construction.
    pub id: String,
    /// Identifier of the model whose queue must process this request.
    pub model_id: String,
    /// User-defined payload, interpreted only by the processor.
    pub params: P,
    /// Estimated input tokens, charged against ITPM/TPM/TPD limiters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_input_tokens: Option<u64>,
    /// Estimated output tokens, charged against OTPM/TPM/TPD limiters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_output_tokens: Option<u64>,
    /// Actual input tokens, set by the processor for reconciliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_input_tokens: Option<u64>,
    /// Actual output tokens, set by the processor for reconciliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output_tokens: Option<u64>,
    /// When `true` (the default) `submit` blocks until the request reaches a
    /// terminal state; when `false` it returns a `Pending` response at once.
    pub wait_for_completion: bool,
    /// Timestamp at which the request was constructed.
    pub created_at: DateTime<Utc>,
    /// Optional caller-owned annotations; never interpreted by the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl<P> QueueRequest<P> {
    /// Creates a request for `model_id` with the given payload.
    pub fn new(model_id: impl Into<String>, params: P) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            params,
            estimated_input_tokens: None,
            estimated_output_tokens: None,
            actual_input_tokens: None,
            actual_output_tokens: None,
            wait_for_completion: true,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// Sets the estimated input/output token counts used for admission.
    pub fn with_estimates(mut self, input: u64, output: u64) -> Self {
        self.estimated_input_tokens = Some(input);
        self.estimated_output_tokens = Some(output);
        self
    }

    /// Attaches caller-owned metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Switches the request to fire-and-forget mode: `submit` returns a
    /// `Pending` response immediately and the terminal response is retained
    /// for later [`get_status`](crate::manager::QueueManager::get_status)
    /// probes.
    pub fn fire_and_forget(mut self) -> Self {
        self.wait_for_completion = false;
        self
    }

    /// Records the token counts actually consumed. Processors call this
    /// before returning; the worker then reconciles the limiter chain.
    pub fn set_actual_usage(&mut self, input: u64, output: u64) {
        self.actual_input_tokens = Some(input);
        self.actual_output_tokens = Some(output);
    }

    /// The estimated cost vector, with missing estimates treated as zero.
    pub fn token_estimate(&self) -> TokenCounts {
        TokenCounts::new(
            self.estimated_input_tokens.unwrap_or(0),
            self.estimated_output_tokens.unwrap_or(0),
        )
    }

    /// The actual cost vector, if the processor recorded either side.
    pub fn token_actuals(&self) -> Option<TokenCounts> {
        if self.actual_input_tokens.is_none() && self.actual_output_tokens.is_none() {
            return None;
        }
        Some(TokenCounts::new(
            self.actual_input_tokens.unwrap_or(0),
            self.actual_output_tokens.unwrap_or(0),
        ))
    }
}

/// The outcome of a queued request.
///
/// Invariants are enforced by the constructors: `Completed` carries a result
/// and no error, `Failed` carries an error and no result, and `Pending` is
/// only produced for fire-and-forget submissions that have not terminated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueResponse<T> {
    /// Id of the originating request.
    pub request_id: String,
    /// Id of the model that processed (or will process) the request.
    pub model_id: String,
    /// Current lifecycle state.
    pub status: RequestStatus,
    /// Processor result, present exactly when `status` is `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    /// Error description, present exactly when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent inside the processor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<Duration>,
    /// Actual input tokens, when the processor reported them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_input_tokens: Option<u64>,
    /// Actual output tokens, when the processor reported them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output_tokens: Option<u64>,
    /// Timestamp at which the originating request was constructed.
    pub created_at: DateTime<Utc>,
}

impl<T> QueueResponse<T> {
    /// A provisional response for a request that has not yet terminated.
    pub fn pending(request_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            model_id: model_id.into(),
            status: RequestStatus::Pending,
            result: None,
            error: None,
            processing_time: None,
            actual_input_tokens: None,
            actual_output_tokens: None,
            created_at: Utc::now(),
        }
    }

    /// A terminal `Completed` response carrying the processor's result.
    pub fn completed(
        request_id: impl Into<String>,
        model_id: impl Into<String>,
        result: T,
    ) -> Self {
        Self {
            result: Some(result),
            status: RequestStatus::Completed,
            ..Self::pending(request_id, model_id)
        }
    }

    /// A terminal `Failed` response carrying the error's string form.
    pub fn failed(
        request_id: impl Into<String>,
        model_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            status: RequestStatus::Failed,
            ..Self::pending(request_id, model_id)
        }
    }

    /// Stamps the processing duration.
    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time = Some(elapsed);
        self
    }

    /// Carries over the original request's creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Carries over the actual token counts the processor reported.
    pub fn with_actual_usage(mut self, input: Option<u64>, output: Option<u64>) -> Self {
        self.actual_input_tokens = input;
        self.actual_output_tokens = output;
        self
    }
}
