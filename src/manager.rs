//! # Queue Manager
//!
//! The [`QueueManager`] is the routing façade over the per-model queues: it
//! maps model ids to their [`ModelQueue`]s, delegates submissions and
//! probes, and coordinates shutdown across every queue at once.
//!
//! The registry is read-mostly: lookups take a shared lock and clone the
//! queue's `Arc`, so submissions never serialize on each other through the
//! manager. Registration and shutdown take the write lock.
//!
//! A manager is an ordinary value, not a process-global: construct one and
//! share it (`Arc<QueueManager<…>>`) wherever submissions originate.
//! Multiple managers in one process are fine; queues never interact across
//! managers.
//!
//! ### Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use llm_fanout::config::{LimiterConfig, ModelConfig};
//! use llm_fanout::manager::QueueManager;
//! use llm_fanout::processor::{Processor, ProcessorResult};
//! use llm_fanout::request::{QueueRequest, RequestStatus};
//!
//! #[derive(Debug)]
//! struct Uppercase;
//!
//! #[async_trait]
//! impl Processor<String, String> for Uppercase {
//!     async fn process(&self, request: &mut QueueRequest<String>) -> ProcessorResult<String> {
//!         Ok(request.params.to_uppercase())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> llm_fanout::Result<()> {
//!     let manager = QueueManager::new();
//!     manager.register(
//!         ModelConfig::new("claude-sonnet").with_limiter(LimiterConfig::rpm(60)),
//!         Arc::new(Uppercase),
//!     )?;
//!
//!     let response = manager
//!         .submit(QueueRequest::new("claude-sonnet", "hello".to_string()))
//!         .await?;
//!     assert_eq!(response.status, RequestStatus::Completed);
//!     assert_eq!(response.result.as_deref(), Some("HELLO"));
//!
//!     manager.shutdown_all(None).await
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::join_all;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{QueueError, Result};
use crate::processor::Processor;
use crate::queue::{ModelQueue, QueueInfo};
use crate::request::{QueueRequest, QueueResponse};

/// Routes requests to per-model queues and coordinates their lifecycles.
pub struct QueueManager<P, T> {
    queues: RwLock<HashMap<String, Arc<ModelQueue<P, T>>>>,
}

impl<P, T> Default for QueueManager<P, T> {
    fn default() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }
}

impl<P, T> QueueManager<P, T>
where
    P: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model: builds its limiter chain, wires the processor,
    /// and starts the queue worker. Fails with `InvalidConfiguration` when
    /// the model id is already registered. Must be called from within a
    /// Tokio runtime.
    pub fn register(
        &self,
        config: ModelConfig,
        processor: Arc<dyn Processor<P, T>>,
    ) -> Result<()> {
        config.validate()?;
        let mut queues = self.queues.write().unwrap();
        if queues.contains_key(&config.model_id) {
            return Err(QueueError::invalid_configuration(format!(
                "model '{}' is already registered",
                config.model_id
            )));
        }
        let model_id = config.model_id.clone();
        let queue = ModelQueue::new(config, processor)?;
        queues.insert(model_id, Arc::new(queue));
        Ok(())
    }

    /// Registers several models sharing one processor. Ids that are already
    /// registered are skipped; a failing configuration aborts the loop
    /// without rolling back earlier registrations.
    pub fn register_many(
        &self,
        configs: Vec<ModelConfig>,
        processor: Arc<dyn Processor<P, T>>,
    ) -> Result<()> {
        for config in configs {
            if self.is_registered(&config.model_id) {
                debug!(model_id = %config.model_id, "already registered, skipping");
                continue;
            }
            self.register(config, processor.clone())?;
        }
        Ok(())
    }

    /// Whether a queue exists for the model id.
    pub fn is_registered(&self, model_id: &str) -> bool {
        self.queues.read().unwrap().contains_key(model_id)
    }

    /// Ids of every registered model.
    pub fn registered_models(&self) -> Vec<String> {
        self.queues.read().unwrap().keys().cloned().collect()
    }

    /// Routes the request to its model's queue. In wait mode this blocks
    /// until the request terminates; fire-and-forget returns a `Pending`
    /// response as soon as the request is enqueued.
    pub async fn submit(&self, request: QueueRequest<P>) -> Result<QueueResponse<T>> {
        let queue = self.lookup(&request.model_id)?;
        queue.submit(request).await
    }

    /// The current status of a request on the given model's queue, with the
    /// terminal response when it is retained.
    pub fn get_status(
        &self,
        model_id: &str,
        request_id: &str,
    ) -> Result<Option<QueueResponse<T>>> {
        Ok(self.lookup(model_id)?.get_status(request_id))
    }

    /// Reconciles a request's estimated token costs against the actual
    /// counts on the model's limiter chain.
    pub fn update_token_usage(
        &self,
        model_id: &str,
        request_id: &str,
        actual_input: u64,
        actual_output: u64,
    ) -> Result<()> {
        self.lookup(model_id)?
            .update_token_usage(request_id, actual_input, actual_output);
        Ok(())
    }

    /// Queue depth and limiter snapshots for one model.
    pub fn info(&self, model_id: &str) -> Result<QueueInfo> {
        Ok(self.lookup(model_id)?.info())
    }

    /// Queue depth and limiter snapshots for every registered model.
    pub fn all_info(&self) -> Vec<QueueInfo> {
        self.queues
            .read()
            .unwrap()
            .values()
            .map(|queue| queue.info())
            .collect()
    }

    /// Drops a retained fire-and-forget response.
    pub fn purge_response(&self, model_id: &str, request_id: &str) -> Result<bool> {
        Ok(self.lookup(model_id)?.purge_response(request_id))
    }

    /// Shuts every queue down concurrently and removes them from the
    /// registry; the same model ids can be registered again afterwards.
    /// Each queue drains its FIFO, or is aborted once `deadline` elapses.
    pub async fn shutdown_all(&self, deadline: Option<Duration>) -> Result<()> {
        let queues: Vec<Arc<ModelQueue<P, T>>> = {
            let mut map = self.queues.write().unwrap();
            map.drain().map(|(_, queue)| queue).collect()
        };
        debug!(queues = queues.len(), "shutting down all queues");
        for result in join_all(queues.iter().map(|queue| queue.shutdown(deadline))).await {
            result?;
        }
        Ok(())
    }

    fn lookup(&self, model_id: &str) -> Result<Arc<ModelQueue<P, T>>> {
        self.queues
            .read()
            .unwrap()
            .get(model_id)
            .cloned()
            .ok_or_else(|| QueueError::model_not_registered(model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::processor::{Processor, ProcessorResult};
    use crate::request::RequestStatus;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Doubler;

    #[async_trait]
    impl Processor<u64, u64> for Doubler {
        async fn process(&self, request: &mut QueueRequest<u64>) -> ProcessorResult<u64> {
            Ok(request.params * 2)
        }
    }

    fn model(model_id: &str) -> ModelConfig {
        ModelConfig::new(model_id).with_limiter(LimiterConfig::rpm(100))
    }

    #[tokio::test]
    async fn test_register_and_submit() {
        let manager = QueueManager::new();
        manager.register(model("m1"), Arc::new(Doubler)).unwrap();

        let response = manager.submit(QueueRequest::new("m1", 4)).await.unwrap();
        assert_eq!(response.status, RequestStatus::Completed);
        assert_eq!(response.result, Some(8));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let manager = QueueManager::new();
        manager.register(model("m1"), Arc::new(Doubler)).unwrap();
        let err = manager.register(model("m1"), Arc::new(Doubler)).unwrap_err();
        assert!(matches!(err, QueueError::InvalidConfiguration { .. }));
    }

    #[tokio::test]
    async fn test_unknown_model_errors() {
        let manager: QueueManager<u64, u64> = QueueManager::new();
        let err = manager.submit(QueueRequest::new("nope", 1)).await.unwrap_err();
        assert!(matches!(err, QueueError::ModelNotRegistered { .. }));
        assert!(manager.get_status("nope", "r1").is_err());
        assert!(manager.info("nope").is_err());
        assert!(manager.update_token_usage("nope", "r1", 1, 1).is_err());
    }

    #[tokio::test]
    async fn test_register_many_skips_existing() {
        let manager = QueueManager::new();
        manager.register(model("m1"), Arc::new(Doubler)).unwrap();
        manager
            .register_many(vec![model("m1"), model("m2")], Arc::new(Doubler))
            .unwrap();

        let mut models = manager.registered_models();
        models.sort();
        assert_eq!(models, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_info_reports_chain_snapshots() {
        let manager = QueueManager::new();
        manager
            .register(
                ModelConfig::new("m1")
                    .with_limiter(LimiterConfig::rpm(10))
                    .with_limiter(LimiterConfig::tpm(1000)),
                Arc::new(Doubler),
            )
            .unwrap();

        manager
            .submit(QueueRequest::new("m1", 1).with_estimates(30, 20))
            .await
            .unwrap();

        let info = manager.info("m1").unwrap();
        assert_eq!(info.model_id, "m1");
        assert_eq!(info.queued, 0);
        assert_eq!(info.limiters[0].usage, 1);
        assert_eq!(info.limiters[1].usage, 50);
        assert_eq!(manager.all_info().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_all_allows_reregistration() {
        let manager = QueueManager::new();
        manager.register(model("m1"), Arc::new(Doubler)).unwrap();
        manager.shutdown_all(None).await.unwrap();
        assert!(manager.registered_models().is_empty());

        manager.register(model("m1"), Arc::new(Doubler)).unwrap();
        let response = manager.submit(QueueRequest::new("m1", 2)).await.unwrap();
        assert_eq!(response.result, Some(4));
    }
}
