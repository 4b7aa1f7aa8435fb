//! Non-blocking trace sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::TraceEvent;

/// Receives every event the collector task drains from the sink.
pub trait TraceExporter: Send + Sync {
    fn export(&self, event: &TraceEvent);
}

/// Writes each event to the `tracing` log at debug level.
pub struct LogExporter;

impl TraceExporter for LogExporter {
    fn export(&self, event: &TraceEvent) {
        tracing::debug!(
            request_id = %event.request_id,
            step = event.step_index,
            phase = %event.phase,
            duration_ms = event.duration_ms,
            outcome = ?event.outcome,
            "trace"
        );
    }
}

/// Producer half handed to every loop. Cheap to clone.
#[derive(Clone)]
pub struct TraceSink {
    tx: mpsc::Sender<TraceEvent>,
    dropped: Arc<AtomicU64>,
}

impl TraceSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TraceEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Create a sink whose events are drained by a spawned collector task.
    pub fn spawn(capacity: usize, exporters: Vec<Arc<dyn TraceExporter>>) -> (Self, JoinHandle<()>) {
        let (sink, mut rx) = Self::new(capacity);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for exporter in &exporters {
                    exporter.export(&event);
                }
            }
        });
        (sink, handle)
    }

    /// Hand an event over without waiting. Returns `false` if it was dropped.
    pub fn emit(&self, event: TraceEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(dropped, "Trace channel full, dropping events");
                }
                false
            }
        }
    }

    /// Events dropped so far because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::TraceCollector;
    use crate::model::TraceOutcome;
    use opsloop_core::{RequestId, StepPhase};

    fn event(step_index: u32) -> TraceEvent {
        TraceEvent {
            request_id: RequestId::new(),
            step_index,
            phase: StepPhase::Think,
            duration_ms: 1,
            outcome: TraceOutcome::Ok,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn full_channel_drops_and_counts() {
        let (sink, mut rx) = TraceSink::new(2);
        let accepted: Vec<bool> = (1..=5).map(|i| sink.emit(event(i))).collect();
        assert_eq!(accepted, vec![true, true, false, false, false]);
        assert_eq!(sink.dropped(), 3);

        assert_eq!(rx.recv().await.unwrap().step_index, 1);
        assert_eq!(rx.recv().await.unwrap().step_index, 2);
    }

    #[tokio::test]
    async fn closed_channel_counts_as_dropped() {
        let (sink, rx) = TraceSink::new(4);
        drop(rx);
        assert!(!sink.emit(event(1)));
        assert_eq!(sink.clone().dropped(), 1);
    }

    #[tokio::test]
    async fn spawned_sink_feeds_exporters() {
        let collector = Arc::new(TraceCollector::new(16, 16));
        let exporters: Vec<Arc<dyn TraceExporter>> = vec![collector.clone(), Arc::new(LogExporter)];
        let (sink, handle) = TraceSink::spawn(8, exporters);
        for i in 1..=3 {
            assert!(sink.emit(event(i)));
        }
        drop(sink);
        handle.await.unwrap();
        assert_eq!(collector.summary(0).total_events, 3);
    }
}
