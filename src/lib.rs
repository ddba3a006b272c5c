//! # llm-fanout
//!
//! A client-side, rate-limited request scheduler for fan-out to remote LLM
//! provider APIs. Applications register models with the rate limits their
//! provider enforces, submit per-model requests, and supply the processor
//! that performs the actual API call; the scheduler admits each request only
//! when **every** configured constraint has capacity, and returns results
//! either synchronously or fire-and-forget.
//!
//! ## Core Concepts
//!
//! - **[`QueueManager`]**: the routing façade. Maps model ids to their
//!   queues, delegates submissions and status probes, and coordinates
//!   shutdown.
//! - **[`ModelQueue`]**: one FIFO and one worker per model. The worker
//!   drains the FIFO strictly in order, drives the limiter chain, and
//!   invokes the processor.
//! - **[`LimiterChain`]**: the ordered limiters guarding one model, with
//!   all-or-nothing admission and estimated-vs-actual token reconciliation.
//! - **Rate limiters**: [`RequestWindow`] (RPM/RPD), [`TokenWindow`]
//!   (TPM/TPD/ITPM/OTPM), and [`Concurrency`], all behind the
//!   [`RateLimiter`] trait.
//! - **[`Processor`]**: your async function from request to result. It owns
//!   all provider I/O and may report the token counts actually consumed so
//!   the windows track reality instead of estimates.
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use llm_fanout::{
//!     LimiterConfig, ModelConfig, Processor, ProcessorResult, QueueManager, QueueRequest,
//!     RequestStatus,
//! };
//!
//! #[derive(Debug)]
//! struct ChatProcessor;
//!
//! #[async_trait]
//! impl Processor<String, String> for ChatProcessor {
//!     async fn process(&self, request: &mut QueueRequest<String>) -> ProcessorResult<String> {
//!         // Call your provider here. Report actual usage when you have it:
//!         request.set_actual_usage(42, 7);
//!         Ok(format!("reply to: {}", request.params))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> llm_fanout::Result<()> {
//!     let manager = QueueManager::new();
//!     manager.register(
//!         ModelConfig::new("claude-sonnet")
//!             .with_limiter(LimiterConfig::rpm(500))
//!             .with_limiter(LimiterConfig::tpm(80_000))
//!             .with_limiter(LimiterConfig::concurrent(8)),
//!         Arc::new(ChatProcessor),
//!     )?;
//!
//!     let request = QueueRequest::new("claude-sonnet", "hello".to_string())
//!         .with_estimates(50, 10);
//!     let response = manager.submit(request).await?;
//!     assert_eq!(response.status, RequestStatus::Completed);
//!
//!     manager.shutdown_all(None).await
//! }
//! ```
//!
//! ## Admission Semantics
//!
//! Per model, submissions are strictly FIFO with respect to admission
//! *attempts*: a request blocked on capacity never yields its position to a
//! later, cheaper request. Token windows are charged with the request's
//! estimates at admission and reconciled to the actual counts afterwards:
//! over-estimates refund capacity, under-estimates record overage without
//! retroactive blocking. Cancelling a waiting `submit` does not cancel the
//! in-flight work; the terminal record stays retrievable through
//! [`QueueManager::get_status`].
//!
//! [`QueueManager`]: crate::manager::QueueManager
//! [`ModelQueue`]: crate::queue::ModelQueue
//! [`LimiterChain`]: crate::limit::chain::LimiterChain
//! [`RequestWindow`]: crate::limit::RequestWindow
//! [`TokenWindow`]: crate::limit::TokenWindow
//! [`Concurrency`]: crate::limit::Concurrency
//! [`RateLimiter`]: crate::limit::RateLimiter
//! [`Processor`]: crate::processor::Processor

pub mod config;
pub mod error;
pub mod limit;
pub mod manager;
pub mod processor;
pub mod queue;
pub mod request;

// Re-export core types for convenience
pub use config::{LimiterConfig, LimiterKind, ModelConfig};
pub use error::{QueueError, Result};
pub use limit::chain::LimiterChain;
pub use limit::{build_limiter, Concurrency, LimiterSnapshot, RateLimiter, RequestWindow, TokenWindow};
pub use manager::QueueManager;
pub use processor::{processor_fn, FnProcessor, Processor, ProcessorError, ProcessorResult};
pub use queue::{ModelQueue, QueueInfo};
pub use request::{QueueRequest, QueueResponse, RequestStatus, TokenCounts};
