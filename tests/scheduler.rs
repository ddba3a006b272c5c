//! End-to-end scenarios for the scheduler: admission under composite
//! limits, estimate reconciliation, fire-and-forget, failure isolation, and
//! shutdown. Timing-sensitive tests run under a paused clock so window
//! arithmetic is exact.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use llm_fanout::{
    LimiterConfig, ModelConfig, ModelQueue, Processor, ProcessorResult, QueueManager,
    QueueRequest, RequestStatus,
};
use tokio::time::Instant;

/// Doubles the numeric payload after an optional delay; fails on negative
/// payloads; optionally reports fixed actual token counts.
#[derive(Debug)]
struct Worker {
    delay: Duration,
    actuals: Option<(u64, u64)>,
    order: Mutex<Vec<i64>>,
    calls: AtomicU64,
}

impl Worker {
    fn instant() -> Self {
        Self::delayed(Duration::ZERO)
    }

    fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            actuals: None,
            order: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    fn reporting(delay: Duration, input: u64, output: u64) -> Self {
        Self {
            actuals: Some((input, output)),
            ..Self::delayed(delay)
        }
    }
}

#[async_trait]
impl Processor<i64, i64> for Worker {
    async fn process(&self, request: &mut QueueRequest<i64>) -> ProcessorResult<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.order.lock().unwrap().push(request.params);
        if let Some((input, output)) = self.actuals {
            request.set_actual_usage(input, output);
        }
        if request.params < 0 {
            return Err(format!("rejected request {}", request.params).into());
        }
        Ok(request.params * 2)
    }
}

/// Submits sequentially-ordered wait-mode requests from spawned tasks,
/// yielding between spawns so enqueue order matches submission order.
async fn submit_in_order(
    manager: &Arc<QueueManager<i64, i64>>,
    model_id: &str,
    params: Vec<i64>,
) -> Vec<tokio::task::JoinHandle<(llm_fanout::QueueResponse<i64>, Duration)>> {
    let t0 = Instant::now();
    let mut handles = Vec::new();
    for param in params {
        let manager = manager.clone();
        let model_id = model_id.to_string();
        handles.push(tokio::spawn(async move {
            let response = manager
                .submit(QueueRequest::new(model_id, param))
                .await
                .unwrap();
            (response, t0.elapsed())
        }));
        tokio::task::yield_now().await;
    }
    handles
}

// Scenario: RPM=2 over a 1 second window, three simultaneous submissions.
// The first two admit immediately; the third waits out the window.
#[tokio::test(start_paused = true)]
async fn strict_rpm_delays_the_third_request() {
    let manager = Arc::new(QueueManager::new());
    manager
        .register(
            ModelConfig::new("m")
                .with_limiter(LimiterConfig::rpm(2).with_window_secs(1)),
            Arc::new(Worker::instant()),
        )
        .unwrap();

    let handles = submit_in_order(&manager, "m", vec![1, 2, 3]).await;
    let mut elapsed = Vec::new();
    for handle in handles {
        let (response, took) = handle.await.unwrap();
        assert_eq!(response.status, RequestStatus::Completed);
        elapsed.push(took);
    }

    assert!(elapsed[0] < Duration::from_millis(100));
    assert!(elapsed[1] < Duration::from_millis(100));
    assert!(elapsed[2] >= Duration::from_secs(1));
}

// Scenario: RPM=100 + TPM=1000 + Concurrent=1, two requests of 800 tokens
// each. Without reconciliation the second request cannot fit inside the
// token window until the first admission ages out.
#[tokio::test(start_paused = true)]
async fn composite_limits_without_reconcile_wait_for_the_window() {
    let processor = Arc::new(Worker::delayed(Duration::from_millis(200)));
    let manager = Arc::new(QueueManager::new());
    manager
        .register(
            ModelConfig::new("m")
                .with_limiter(LimiterConfig::rpm(100))
                .with_limiter(LimiterConfig::tpm(1000))
                .with_limiter(LimiterConfig::concurrent(1)),
            processor.clone(),
        )
        .unwrap();

    let t0 = Instant::now();
    let mut handles = Vec::new();
    for param in [1i64, 2] {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let response = manager
                .submit(QueueRequest::new("m", param).with_estimates(400, 400))
                .await
                .unwrap();
            (response, t0.elapsed())
        }));
        tokio::task::yield_now().await;
    }

    let (first, first_took) = handles.remove(0).await.unwrap();
    let (second, second_took) = handles.remove(0).await.unwrap();
    assert_eq!(first.status, RequestStatus::Completed);
    assert_eq!(second.status, RequestStatus::Completed);
    assert!(second_took > first_took);
    // 800 + 800 > 1000: the second admission waits out the 60s window
    assert!(second_took >= Duration::from_secs(60));
    assert_eq!(*processor.order.lock().unwrap(), vec![1, 2]);

    let info = manager.info("m").unwrap();
    assert_eq!(info.limiters[2].usage, 0); // concurrency fully released
}

// Same composite chain, but the processor reports actual usage far below
// the estimates: reconciliation frees the window and the second request
// only ever waits on the concurrency slot.
#[tokio::test(start_paused = true)]
async fn composite_limits_with_reconcile_admit_back_to_back() {
    let processor = Arc::new(Worker::reporting(Duration::from_millis(200), 100, 100));
    let manager = Arc::new(QueueManager::new());
    manager
        .register(
            ModelConfig::new("m")
                .with_limiter(LimiterConfig::rpm(100))
                .with_limiter(LimiterConfig::tpm(1000))
                .with_limiter(LimiterConfig::concurrent(1)),
            processor.clone(),
        )
        .unwrap();

    let handles = submit_in_order(&manager, "m", vec![1, 2]).await;
    let mut elapsed = Vec::new();
    for handle in handles {
        let (response, took) = handle.await.unwrap();
        assert_eq!(response.status, RequestStatus::Completed);
        assert_eq!(response.actual_input_tokens, Some(100));
        elapsed.push(took);
    }

    // two sequential 200ms processing spans, no window wait
    assert!(elapsed[1] >= Duration::from_millis(400));
    assert!(elapsed[1] < Duration::from_secs(1));

    // both reservations reconciled down to their actual 200 tokens
    let info = manager.info("m").unwrap();
    assert_eq!(info.limiters[1].usage, 400);
}

// Scenario: over-estimate reconcile. A 1000-token reservation shrinks to
// 200 after the fact, leaving room for an 800-token request at once.
#[tokio::test(start_paused = true)]
async fn over_estimate_reconcile_frees_capacity() {
    let manager = Arc::new(QueueManager::new());
    manager
        .register(
            ModelConfig::new("m").with_limiter(LimiterConfig::tpm(1000)),
            Arc::new(Worker::instant()),
        )
        .unwrap();

    let first = QueueRequest::new("m", 1).with_estimates(500, 500);
    let first_id = first.id.clone();
    let response = manager.submit(first).await.unwrap();
    assert_eq!(response.status, RequestStatus::Completed);
    assert_eq!(manager.info("m").unwrap().limiters[0].usage, 1000);

    manager.update_token_usage("m", &first_id, 100, 100).unwrap();
    assert_eq!(manager.info("m").unwrap().limiters[0].usage, 200);

    let started = Instant::now();
    let response = manager
        .submit(QueueRequest::new("m", 2).with_estimates(700, 100))
        .await
        .unwrap();
    assert_eq!(response.status, RequestStatus::Completed);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(manager.info("m").unwrap().limiters[0].usage, 1000);
}

// Scenario: fire-and-forget returns Pending immediately; polling get_status
// eventually observes the completed result, which stays retained.
#[tokio::test(start_paused = true)]
async fn fire_and_forget_is_observable_after_completion() {
    let manager = Arc::new(QueueManager::new());
    manager
        .register(
            ModelConfig::new("m").with_limiter(LimiterConfig::rpm(10)),
            Arc::new(Worker::delayed(Duration::from_millis(100))),
        )
        .unwrap();

    let request = QueueRequest::new("m", 21).fire_and_forget();
    let request_id = request.id.clone();

    let started = Instant::now();
    let response = manager.submit(request).await.unwrap();
    assert_eq!(response.status, RequestStatus::Pending);
    assert!(started.elapsed() < Duration::from_millis(10));

    let terminal = loop {
        let status = manager
            .get_status("m", &request_id)
            .unwrap()
            .expect("record must stay observable");
        if status.status.is_terminal() {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert_eq!(terminal.status, RequestStatus::Completed);
    assert_eq!(terminal.result, Some(42));

    // still retained on a second probe
    let again = manager.get_status("m", &request_id).unwrap().unwrap();
    assert_eq!(again.status, RequestStatus::Completed);
    assert!(manager.purge_response("m", &request_id).unwrap());
    assert!(manager.get_status("m", &request_id).unwrap().is_none());
}

// Scenario: a processor that fails on odd requests. Failures stay confined
// to their own request, the limiters drain back to zero, and the worker
// keeps serving.
#[tokio::test]
async fn processor_failures_are_isolated() {
    let processor = Arc::new(Worker::instant());
    let manager = Arc::new(QueueManager::new());
    manager
        .register(
            ModelConfig::new("m")
                .with_limiter(LimiterConfig::rpm(100))
                .with_limiter(LimiterConfig::concurrent(2)),
            processor.clone(),
        )
        .unwrap();

    let mut completed = 0;
    let mut failed = 0;
    for i in 1i64..=10 {
        let param = if i % 2 == 1 { -i } else { i };
        let response = manager.submit(QueueRequest::new("m", param)).await.unwrap();
        match response.status {
            RequestStatus::Completed => completed += 1,
            RequestStatus::Failed => {
                assert_eq!(
                    response.error.as_deref(),
                    Some(format!("rejected request {param}").as_str())
                );
                failed += 1;
            }
            status => panic!("unexpected status {status:?}"),
        }
    }
    assert_eq!(completed, 5);
    assert_eq!(failed, 5);

    // concurrency usage drained; worker still alive
    let info = manager.info("m").unwrap();
    assert_eq!(info.limiters[1].usage, 0);
    let response = manager.submit(QueueRequest::new("m", 100)).await.unwrap();
    assert_eq!(response.result, Some(200));
}

// Scenario: shutdown drains the FIFO, then refuses new submissions with a
// shutdown error.
#[tokio::test(start_paused = true)]
async fn shutdown_drains_pending_requests() {
    let processor = Arc::new(Worker::delayed(Duration::from_millis(20)));
    let queue: Arc<ModelQueue<i64, i64>> = Arc::new(
        ModelQueue::new(
            ModelConfig::new("m").with_limiter(LimiterConfig::rpm(100)),
            processor.clone(),
        )
        .unwrap(),
    );

    let mut ids = Vec::new();
    for i in 0..5 {
        let request = QueueRequest::new("m", i).fire_and_forget();
        ids.push(request.id.clone());
        queue.enqueue(request).unwrap();
    }
    queue.shutdown(None).await.unwrap();

    assert_eq!(processor.calls.load(Ordering::SeqCst), 5);
    for id in &ids {
        let status = queue.get_status(id).expect("retained");
        assert_eq!(status.status, RequestStatus::Completed);
    }

    let err = queue.submit(QueueRequest::new("m", 9)).await.unwrap_err();
    assert!(err.is_shutdown());
}

// A waiting submitter that goes away must not cancel the in-flight work:
// the worker still completes the request and the record stays observable.
#[tokio::test(start_paused = true)]
async fn cancelled_waiter_does_not_cancel_the_work() {
    let processor = Arc::new(Worker::delayed(Duration::from_millis(100)));
    let manager = Arc::new(QueueManager::new());
    manager
        .register(ModelConfig::new("m"), processor.clone())
        .unwrap();

    let request = QueueRequest::new("m", 7);
    let request_id = request.id.clone();
    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.submit(request).await })
    };
    tokio::task::yield_now().await;

    waiter.abort();
    let _ = waiter.await;

    let terminal = loop {
        if let Some(status) = manager.get_status("m", &request_id).unwrap() {
            if status.status.is_terminal() {
                break status;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(terminal.status, RequestStatus::Completed);
    assert_eq!(terminal.result, Some(14));
    assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
}

// Zero limiters configured: every request admits immediately.
#[tokio::test(start_paused = true)]
async fn unconstrained_model_admits_immediately() {
    let manager = Arc::new(QueueManager::new());
    manager
        .register(ModelConfig::new("m"), Arc::new(Worker::instant()))
        .unwrap();

    let started = Instant::now();
    for i in 0..20 {
        let response = manager.submit(QueueRequest::new("m", i)).await.unwrap();
        assert_eq!(response.status, RequestStatus::Completed);
    }
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(manager.info("m").unwrap().limiters.is_empty());
}
