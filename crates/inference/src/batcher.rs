//! InferenceBatcher: many concurrent loops, one expensive backend.
//!
//! Each distinct model gets one dispatcher task and one open batch. Callers
//! push requests into an unbounded per-model queue and await a one-shot
//! reply; only the dispatcher touches the open batch.
//!
//! ```text
//! loop A ─┐                       ┌─▶ reply A
//! loop B ─┼─▶ queue(model) ─▶ batch ─▶ backend.generate ─┼─▶ reply B
//! loop C ─┘                       └─▶ reply C
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use opsloop_config::InferenceConfig;
use opsloop_core::{Generation, InferenceBackend, InferenceError, Prompt, RequestId};
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::time::Instant;

use crate::batch::{Batch, CloseReason, InferenceRequest};

/// Batching knobs, per model.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub max_batch_size: usize,
    pub max_wait: Duration,
    pub backend_timeout: Duration,
    pub max_inflight_batches: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_wait: Duration::from_millis(25),
            backend_timeout: Duration::from_secs(60),
            max_inflight_batches: 1,
        }
    }
}

impl From<&InferenceConfig> for BatcherConfig {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            max_wait: Duration::from_millis(config.max_wait_ms),
            backend_timeout: Duration::from_secs(config.backend_timeout_secs),
            max_inflight_batches: config.max_inflight_batches.max(1),
        }
    }
}

/// Counters shared by all dispatchers of one batcher.
#[derive(Debug, Default)]
pub struct BatcherStats {
    batches_dispatched: AtomicU64,
    requests_served: AtomicU64,
    closed_by_size: AtomicU64,
    closed_by_wait: AtomicU64,
    failed_batches: AtomicU64,
}

/// Point-in-time copy of [`BatcherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatcherSnapshot {
    pub batches_dispatched: u64,
    pub requests_served: u64,
    pub closed_by_size: u64,
    pub closed_by_wait: u64,
    pub failed_batches: u64,
}

impl BatcherStats {
    fn record_dispatch(&self, size: usize, reason: CloseReason) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.requests_served.fetch_add(size as u64, Ordering::Relaxed);
        match reason {
            CloseReason::Full => self.closed_by_size.fetch_add(1, Ordering::Relaxed),
            CloseReason::MaxWait => self.closed_by_wait.fetch_add(1, Ordering::Relaxed),
            CloseReason::Drained => 0,
        };
    }

    pub(crate) fn record_failure(&self) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BatcherSnapshot {
        BatcherSnapshot {
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            requests_served: self.requests_served.load(Ordering::Relaxed),
            closed_by_size: self.closed_by_size.load(Ordering::Relaxed),
            closed_by_wait: self.closed_by_wait.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
        }
    }
}

/// Groups think-step requests into batches per model.
pub struct InferenceBatcher {
    backend: Arc<dyn InferenceBackend>,
    config: BatcherConfig,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<InferenceRequest>>>,
    stats: Arc<BatcherStats>,
}

impl InferenceBatcher {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: BatcherConfig) -> Self {
        Self {
            backend,
            config,
            queues: Mutex::new(HashMap::new()),
            stats: Arc::new(BatcherStats::default()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn stats(&self) -> BatcherSnapshot {
        self.stats.snapshot()
    }

    /// Submit one prompt and wait for its result.
    ///
    /// Never blocks on the queue; suspends only until this request's batch
    /// has been answered. Dropping the returned future abandons the reply
    /// without affecting the rest of the batch.
    pub async fn submit(
        &self,
        owner: RequestId,
        model: &str,
        prompt: Prompt,
    ) -> Result<Generation, InferenceError> {
        let (reply, rx) = oneshot::channel();
        let request = InferenceRequest {
            owner,
            prompt,
            enqueued_at: Instant::now(),
            reply,
        };
        tracing::trace!(request_id = %owner, model, "Submitting inference request");

        self.sender_for(model)
            .send(request)
            .map_err(|_| InferenceError::BatcherClosed)?;
        rx.await.map_err(|_| InferenceError::BatcherClosed)?
    }

    /// Queue for `model`, spawning its dispatcher on first use.
    fn sender_for(&self, model: &str) -> mpsc::UnboundedSender<InferenceRequest> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = queues.get(model) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(model, "Starting batch dispatcher");
        tokio::spawn(run_dispatcher(
            model.to_string(),
            rx,
            Arc::clone(&self.backend),
            self.config.clone(),
            Arc::clone(&self.stats),
        ));
        queues.insert(model.to_string(), tx.clone());
        tx
    }
}

/// Owns the open batch for one model. Exits when every sender is gone.
async fn run_dispatcher(
    model: String,
    mut rx: mpsc::UnboundedReceiver<InferenceRequest>,
    backend: Arc<dyn InferenceBackend>,
    config: BatcherConfig,
    stats: Arc<BatcherStats>,
) {
    let inflight = Arc::new(Semaphore::new(config.max_inflight_batches));
    let mut batch = Batch::open(config.max_batch_size, config.max_wait);
    let mut open = true;

    while open || !batch.is_empty() {
        let reason = match batch.deadline() {
            None => match rx.recv().await {
                Some(request) => {
                    batch.push(request);
                    if !batch.is_full() {
                        continue;
                    }
                    CloseReason::Full
                }
                None => break,
            },
            Some(deadline) => tokio::select! {
                biased;
                received = rx.recv(), if open => match received {
                    Some(request) => {
                        batch.push(request);
                        if !batch.is_full() {
                            continue;
                        }
                        CloseReason::Full
                    }
                    None => {
                        open = false;
                        CloseReason::Drained
                    }
                },
                _ = tokio::time::sleep_until(deadline) => CloseReason::MaxWait,
            },
        };

        // Waiting here lets requests pile up in the queue while the
        // previous batch is still with the backend.
        let Ok(permit) = Arc::clone(&inflight).acquire_owned().await else {
            break;
        };

        let closed = batch.take();
        let size = closed.len();
        stats.record_dispatch(size, reason);
        tracing::debug!(model = %model, batch_size = size, reason = ?reason, "Dispatching batch");

        let backend = Arc::clone(&backend);
        let stats = Arc::clone(&stats);
        let model = model.clone();
        let timeout = config.backend_timeout;
        tokio::spawn(async move {
            closed.dispatch(backend, &model, timeout, &stats).await;
            drop(permit);
        });
    }

    tracing::debug!(model = %model, "Batch dispatcher stopped");
}
