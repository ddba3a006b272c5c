//! # Per-Model Queue and Worker (orientation)
//!
//! A [`ModelQueue`] owns the FIFO of pending requests for one model, the
//! single worker task that drains it, the model's limiter chain, and the
//! map of request records still observable through status probes. The
//! worker serializes admission: it drives `acquire_all` for one request at
//! a time, so FIFO order is preserved with respect to admission *attempts*.
//! A request blocked on capacity never yields its position to a later,
//! cheaper one.
//!
//! Submitters rendezvous with the worker through a `tokio::sync::watch`
//! channel per request: single producer, tolerant of late readers, and
//! independent of the waiter's lifetime. A submitter that cancels its wait
//! does not cancel the in-flight work, and the terminal record stays
//! retrievable via [`get_status`](ModelQueue::get_status).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::{QueueError, Result};
use crate::limit::chain::LimiterChain;
use crate::limit::LimiterSnapshot;
use crate::processor::Processor;
use crate::request::{QueueRequest, QueueResponse, RequestStatus, TokenCounts};

/// Queue depth plus the chain's observability snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub model_id: String,
    /// Requests enqueued but not yet picked up by the worker.
    pub queued: usize,
    pub shutting_down: bool,
    pub limiters: Vec<LimiterSnapshot>,
}

/// One observable request: its status, its rendezvous, and (once terminal
/// and retained) its response.
struct RequestEntry<T> {
    status: RequestStatus,
    wait_for_completion: bool,
    created_at: DateTime<Utc>,
    done: watch::Sender<Option<QueueResponse<T>>>,
    response: Option<QueueResponse<T>>,
}

/// State shared between the queue handle and its worker task.
struct Shared<T> {
    model_id: String,
    entries: Mutex<HashMap<String, RequestEntry<T>>>,
    queued: AtomicUsize,
    shutting_down: AtomicBool,
}

impl<T: Clone> Shared<T> {
    fn set_status(&self, request_id: &str, status: RequestStatus) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(request_id) {
            entry.status = status;
        }
    }

    /// Delivers the terminal response exactly once. Wait-mode entries are
    /// pruned once a live waiter has the value; entries whose waiter went
    /// away (and all fire-and-forget entries) retain the response for later
    /// status probes.
    fn publish(&self, request_id: &str, response: QueueResponse<T>) {
        let mut entries = self.entries.lock().unwrap();
        let retain = {
            let Some(entry) = entries.get_mut(request_id) else {
                return;
            };
            entry.status = response.status;
            let delivered = entry.done.send(Some(response.clone())).is_ok();
            if delivered && entry.wait_for_completion {
                false
            } else {
                entry.response = Some(response);
                true
            }
        };
        if !retain {
            entries.remove(request_id);
        }
    }

    /// Fails every non-terminal entry with a shutdown-cause error.
    fn fail_outstanding(&self) {
        let mut entries = self.entries.lock().unwrap();
        for (request_id, entry) in entries.iter_mut() {
            if entry.status.is_terminal() {
                continue;
            }
            entry.status = RequestStatus::Failed;
            let response = QueueResponse::failed(
                request_id.clone(),
                &self.model_id,
                QueueError::queue_shutdown(&self.model_id).to_string(),
            )
            .with_created_at(entry.created_at);
            let _ = entry.done.send(Some(response.clone()));
            entry.response = Some(response);
        }
    }
}

/// FIFO queue, worker, and limiter chain for one registered model.
pub struct ModelQueue<P, T> {
    model_id: String,
    chain: Arc<LimiterChain>,
    shared: Arc<Shared<T>>,
    sender: Mutex<Option<mpsc::UnboundedSender<QueueRequest<P>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<P, T> ModelQueue<P, T>
where
    P: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Validates the configuration, builds the limiter chain, and spawns the
    /// worker. Must be called from within a Tokio runtime.
    pub fn new(config: ModelConfig, processor: Arc<dyn Processor<P, T>>) -> Result<Self> {
        config.validate()?;
        let chain = Arc::new(LimiterChain::from_configs(&config.limiters)?);
        let shared = Arc::new(Shared {
            model_id: config.model_id.clone(),
            entries: Mutex::new(HashMap::new()),
            queued: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        });
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            shared.clone(),
            chain.clone(),
            processor,
            receiver,
        ));
        info!(
            model_id = %config.model_id,
            limiters = chain.len(),
            "model queue started"
        );
        Ok(Self {
            model_id: config.model_id,
            chain,
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The model this queue serves.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Inserts the request into the FIFO and returns the rendezvous
    /// receiver. The receiver observes `None` until the request terminates,
    /// then the terminal response.
    pub fn enqueue(
        &self,
        request: QueueRequest<P>,
    ) -> Result<watch::Receiver<Option<QueueResponse<T>>>> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(QueueError::queue_shutdown(&self.model_id));
        }
        if request.model_id != self.model_id {
            return Err(QueueError::invalid_configuration(format!(
                "request targets model '{}' but this queue serves '{}'",
                request.model_id, self.model_id
            )));
        }

        let request_id = request.id.clone();
        let (done, receiver) = watch::channel(None);
        self.shared.entries.lock().unwrap().insert(
            request_id.clone(),
            RequestEntry {
                status: RequestStatus::Pending,
                wait_for_completion: request.wait_for_completion,
                created_at: request.created_at,
                done,
                response: None,
            },
        );

        let sent = {
            let sender = self.sender.lock().unwrap();
            match sender.as_ref() {
                Some(tx) => tx.send(request).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.shared.entries.lock().unwrap().remove(&request_id);
            return Err(QueueError::queue_shutdown(&self.model_id));
        }
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        debug!(model_id = %self.model_id, request_id = %request_id, "enqueued");
        Ok(receiver)
    }

    /// Enqueues the request and, in wait mode, blocks until it terminates.
    /// Fire-and-forget requests return a `Pending` response immediately.
    pub async fn submit(&self, request: QueueRequest<P>) -> Result<QueueResponse<T>> {
        let wait = request.wait_for_completion;
        let request_id = request.id.clone();
        let created_at = request.created_at;
        let mut receiver = self.enqueue(request)?;

        if !wait {
            return Ok(
                QueueResponse::pending(request_id, &self.model_id).with_created_at(created_at)
            );
        }
        loop {
            if let Some(response) = receiver.borrow_and_update().clone() {
                return Ok(response);
            }
            if receiver.changed().await.is_err() {
                // sender gone: the entry was pruned after delivery, so the
                // final value (if any) is still in the channel
                return match receiver.borrow().clone() {
                    Some(response) => Ok(response),
                    None => Err(QueueError::queue_shutdown(&self.model_id)),
                };
            }
        }
    }

    /// The current status of a request, with the terminal response when it
    /// is retained. `None` when the id is unknown or already pruned.
    pub fn get_status(&self, request_id: &str) -> Option<QueueResponse<T>> {
        let entries = self.shared.entries.lock().unwrap();
        let entry = entries.get(request_id)?;
        if let Some(response) = &entry.response {
            return Some(response.clone());
        }
        let mut response = QueueResponse::pending(request_id, &self.model_id);
        response.status = entry.status;
        Some(response.with_created_at(entry.created_at))
    }

    /// Forwards actual token counts to the chain for reconciliation. Valid
    /// from any context, including after the response was published (late
    /// accounting adjusts the windowed counters only).
    pub fn update_token_usage(&self, request_id: &str, actual_input: u64, actual_output: u64) {
        self.chain
            .update_usage(request_id, TokenCounts::new(actual_input, actual_output));
    }

    /// Drops a retained terminal response. Returns `false` when the id is
    /// unknown or the request has not terminated yet.
    pub fn purge_response(&self, request_id: &str) -> bool {
        let mut entries = self.shared.entries.lock().unwrap();
        match entries.get(request_id) {
            Some(entry) if entry.status.is_terminal() => {
                entries.remove(request_id);
                true
            }
            _ => false,
        }
    }

    /// Queue depth and chain snapshot.
    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            model_id: self.model_id.clone(),
            queued: self.shared.queued.load(Ordering::SeqCst),
            shutting_down: self.shared.shutting_down.load(Ordering::SeqCst),
            limiters: self.chain.snapshots(),
        }
    }

    /// Gracefully shuts the queue down: new enqueues are refused at once,
    /// the FIFO drains, and the worker exits. With a deadline, a worker that
    /// has not drained in time is aborted; partially acquired limiters are
    /// released by the worker's guards, and any request that never reached a
    /// terminal state is failed with a shutdown-cause error. Idempotent.
    pub async fn shutdown(&self, deadline: Option<Duration>) -> Result<()> {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        drop(self.sender.lock().unwrap().take());

        let handle = self.worker.lock().unwrap().take();
        let Some(mut handle) = handle else {
            return Ok(());
        };
        match deadline {
            None => {
                let _ = (&mut handle).await;
            }
            Some(limit) => {
                if tokio::time::timeout(limit, &mut handle).await.is_err() {
                    warn!(
                        model_id = %self.model_id,
                        "shutdown deadline elapsed, aborting worker"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
        self.shared.fail_outstanding();
        info!(model_id = %self.model_id, "queue shut down");
        Ok(())
    }
}

/// Releases the chain on every exit from the per-request scope, including
/// worker abort mid-processing.
struct ReleaseGuard<'a> {
    chain: &'a LimiterChain,
    request_id: &'a str,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.chain.release_all(self.request_id);
    }
}

async fn run_worker<P, T>(
    shared: Arc<Shared<T>>,
    chain: Arc<LimiterChain>,
    processor: Arc<dyn Processor<P, T>>,
    mut receiver: mpsc::UnboundedReceiver<QueueRequest<P>>,
) where
    P: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    while let Some(mut request) = receiver.recv().await {
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        let request_id = request.id.clone();

        if let Err(err) = chain.acquire_all(&request_id, request.token_estimate()).await {
            // admission can only fail on a configuration fault; the request
            // is unprocessable, not the queue
            warn!(
                model_id = %shared.model_id,
                request_id = %request_id,
                error = %err,
                "admission rejected"
            );
            let response = QueueResponse::failed(&request_id, &shared.model_id, err.to_string())
                .with_created_at(request.created_at);
            shared.publish(&request_id, response);
            continue;
        }
        let release = ReleaseGuard {
            chain: &chain,
            request_id: &request_id,
        };

        shared.set_status(&request_id, RequestStatus::Processing);
        let started = tokio::time::Instant::now();
        let outcome = std::panic::AssertUnwindSafe(processor.process(&mut request))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        if let Some(actuals) = request.token_actuals() {
            chain.update_usage(&request_id, actuals);
        }
        drop(release);

        let response = match outcome {
            Ok(Ok(result)) => QueueResponse::completed(&request_id, &shared.model_id, result),
            Ok(Err(err)) => {
                debug!(
                    model_id = %shared.model_id,
                    request_id = %request_id,
                    error = %err,
                    "processor failed"
                );
                QueueResponse::failed(&request_id, &shared.model_id, err.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(
                    model_id = %shared.model_id,
                    request_id = %request_id,
                    panic = %message,
                    "processor panicked"
                );
                QueueResponse::failed(
                    &request_id,
                    &shared.model_id,
                    format!("processor panicked: {message}"),
                )
            }
        }
        .with_processing_time(elapsed)
        .with_created_at(request.created_at)
        .with_actual_usage(request.actual_input_tokens, request.actual_output_tokens);

        shared.publish(&request_id, response);
    }
    debug!(model_id = %shared.model_id, "worker drained, exiting");
}
