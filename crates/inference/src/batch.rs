//! A single batch of inference requests and its one-shot dispatch.

use std::sync::Arc;
use std::time::Duration;

use opsloop_core::{Generation, InferenceBackend, InferenceError, Prompt, RequestId};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::batcher::BatcherStats;

/// One caller's think step, owned by the batcher until answered.
#[derive(Debug)]
pub struct InferenceRequest {
    /// The loop that submitted this request
    pub owner: RequestId,
    pub prompt: Prompt,
    pub enqueued_at: Instant,
    pub reply: oneshot::Sender<Result<Generation, InferenceError>>,
}

/// Why a batch was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Reached `max_batch_size`
    Full,
    /// Oldest member waited `max_wait`
    MaxWait,
    /// The submit side went away; flushing what is left
    Drained,
}

/// Ordered, bounded group of requests for one model.
#[derive(Debug)]
pub struct Batch {
    requests: Vec<InferenceRequest>,
    max_size: usize,
    max_wait: Duration,
}

impl Batch {
    pub fn open(max_size: usize, max_wait: Duration) -> Self {
        Self {
            requests: Vec::with_capacity(max_size),
            max_size,
            max_wait,
        }
    }

    pub fn push(&mut self, request: InferenceRequest) {
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.requests.len() >= self.max_size
    }

    /// Instant at which the batch must close, set by its oldest member.
    pub fn deadline(&self) -> Option<Instant> {
        self.requests.first().map(|r| r.enqueued_at + self.max_wait)
    }

    /// Take the current members, leaving an empty batch behind.
    pub fn take(&mut self) -> Batch {
        Batch {
            requests: std::mem::replace(&mut self.requests, Vec::with_capacity(self.max_size)),
            max_size: self.max_size,
            max_wait: self.max_wait,
        }
    }

    /// Send every prompt to the backend in one call and answer every member.
    ///
    /// A failed batch is counted in `stats` before any member is answered.
    pub async fn dispatch(
        self,
        backend: Arc<dyn InferenceBackend>,
        model: &str,
        timeout: Duration,
        stats: &BatcherStats,
    ) {
        let size = self.requests.len();
        let (prompts, replies): (Vec<Prompt>, Vec<_>) = self
            .requests
            .into_iter()
            .map(|r| (r.prompt, r.reply))
            .unzip();

        let outcome = match tokio::time::timeout(timeout, backend.generate(model, prompts)).await {
            Ok(Ok(results)) if results.len() == size => Ok(results),
            Ok(Ok(results)) => Err(InferenceError::Malformed(format!(
                "backend returned {} results for a batch of {size}",
                results.len()
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(InferenceError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(results) => {
                for (reply, result) in replies.into_iter().zip(results) {
                    // The caller may have given up (deadline, cancellation).
                    let _ = reply.send(result);
                }
            }
            Err(e) => {
                tracing::warn!(model, batch_size = size, error = %e, "Batch failed");
                stats.record_failure();
                for reply in replies {
                    let _ = reply.send(Err(e.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedBackend;
    use opsloop_core::Message;

    fn request(text: &str) -> (InferenceRequest, oneshot::Receiver<Result<Generation, InferenceError>>) {
        let (tx, rx) = oneshot::channel();
        (
            InferenceRequest {
                owner: RequestId::new(),
                prompt: Prompt::new(vec![Message::user(text)], vec![]),
                enqueued_at: Instant::now(),
                reply: tx,
            },
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_follows_oldest_member() {
        let mut batch = Batch::open(4, Duration::from_millis(20));
        assert!(batch.deadline().is_none());
        let (first, _rx1) = request("a");
        let expected = first.enqueued_at + Duration::from_millis(20);
        batch.push(first);
        tokio::time::advance(Duration::from_millis(5)).await;
        let (second, _rx2) = request("b");
        batch.push(second);
        assert_eq!(batch.deadline(), Some(expected));
        assert!(!batch.is_full());

        let taken = batch.take();
        assert_eq!(taken.len(), 2);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn result_count_mismatch_fails_every_member() {
        let backend = Arc::new(ScriptedBackend::from_fn(|_| Ok(Generation::answer("x"))).with_fixed_count(1));
        let mut batch = Batch::open(4, Duration::from_millis(20));
        let (a, rx_a) = request("a");
        let (b, rx_b) = request("b");
        batch.push(a);
        batch.push(b);

        let stats = BatcherStats::default();
        batch.dispatch(backend, "m", Duration::from_secs(1), &stats).await;
        assert_eq!(stats.snapshot().failed_batches, 1);
        for rx in [rx_a, rx_b] {
            assert!(matches!(rx.await.unwrap(), Err(InferenceError::Malformed(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backend_timeout_fails_every_member() {
        let backend = Arc::new(
            ScriptedBackend::from_fn(|_| Ok(Generation::answer("late"))).with_delay(Duration::from_secs(5)),
        );
        let mut batch = Batch::open(4, Duration::from_millis(20));
        let (a, rx_a) = request("a");
        batch.push(a);

        let stats = BatcherStats::default();
        batch.dispatch(backend, "m", Duration::from_secs(1), &stats).await;
        assert_eq!(
            rx_a.await.unwrap(),
            Err(InferenceError::Timeout { timeout_ms: 1000 })
        );
    }
}
