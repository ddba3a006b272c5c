//! # The Processor Contract
//!
//! A [`Processor`] is the user-supplied function a queue worker invokes once
//! a request has been admitted by every limiter in the model's chain. It
//! owns all provider I/O; the core never inspects the payload or the result.
//!
//! A processor signals failure by returning an error in the language-native
//! idiom (`Result` with a boxed error); the worker translates that into a
//! `Failed` response carrying the error's string form. Before returning, a
//! processor may record the token counts the provider actually consumed via
//! [`QueueRequest::set_actual_usage`]; the worker then reconciles the
//! model's token windows against those actuals.
//!
//! ### Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use llm_fanout::processor::{Processor, ProcessorResult};
//! use llm_fanout::request::QueueRequest;
//!
//! #[derive(Debug)]
//! struct EchoProcessor;
//!
//! #[async_trait]
//! impl Processor<String, String> for EchoProcessor {
//!     async fn process(&self, request: &mut QueueRequest<String>) -> ProcessorResult<String> {
//!         // A real processor would call a provider API here.
//!         request.set_actual_usage(12, 4);
//!         Ok(format!("echo: {}", request.params))
//!     }
//! }
//! ```
//!
//! [`QueueRequest::set_actual_usage`]: crate::request::QueueRequest::set_actual_usage

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::request::QueueRequest;

/// The error type processors return. Anything that converts into a boxed
/// error works; the worker only keeps its string form.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shorthand for a processor's return type.
pub type ProcessorResult<T> = std::result::Result<T, ProcessorError>;

/// A user-supplied work function, invoked by a queue worker with exclusive
/// access to the request record.
#[async_trait]
pub trait Processor<P, T>: Send + Sync {
    /// Processes one admitted request. May suspend for provider I/O.
    async fn process(&self, request: &mut QueueRequest<P>) -> ProcessorResult<T>;
}

/// Adapts a function returning a boxed future into a [`Processor`].
///
/// Constructed through [`processor_fn`]. The function ties the future's
/// lifetime to the request borrow, so write it as a named `fn` returning
/// [`BoxFuture`](futures::future::BoxFuture):
///
/// ```rust
/// use futures::future::BoxFuture;
/// use llm_fanout::processor::{processor_fn, ProcessorResult};
/// use llm_fanout::request::QueueRequest;
///
/// fn double(request: &mut QueueRequest<u32>) -> BoxFuture<'_, ProcessorResult<u32>> {
///     Box::pin(async move { Ok(request.params * 2) })
/// }
///
/// let processor = processor_fn(double);
/// # let _ = processor;
/// ```
pub struct FnProcessor<F> {
    func: F,
}

/// Wraps a request-processing function in a [`FnProcessor`].
pub fn processor_fn<F>(func: F) -> FnProcessor<F> {
    FnProcessor { func }
}

#[async_trait]
impl<P, T, F> Processor<P, T> for FnProcessor<F>
where
    P: Send + 'static,
    T: Send + 'static,
    F: for<'a> Fn(&'a mut QueueRequest<P>) -> BoxFuture<'a, ProcessorResult<T>> + Send + Sync,
{
    async fn process(&self, request: &mut QueueRequest<P>) -> ProcessorResult<T> {
        (self.func)(request).await
    }
}
