//! LoopSupervisor: admission, cancellation, snapshots and traces for every
//! live reasoning loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use opsloop_config::SupervisorConfig;
use opsloop_core::{AbortReason, RequestId, ToolDefinition};
use opsloop_inference::BatcherSnapshot;
use opsloop_telemetry::{LogExporter, TraceCollector, TraceExporter, TraceSink, TraceSummary};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::budget::Budget;
use crate::outcome::{FailureReport, LoopOutcome};
use crate::reasoning::{LoopResources, ReasoningLoop};
use crate::state::{LoopSnapshot, LoopState};

const TRACE_REQUESTS_KEPT: usize = 256;
const TRACE_EVENTS_PER_REQUEST: usize = 64;

struct LiveLoop {
    cancel: watch::Sender<bool>,
    snapshot: watch::Receiver<LoopSnapshot>,
}

type LiveMap = Arc<Mutex<HashMap<RequestId, LiveLoop>>>;

/// A place in the admission queue. The admission task hands the permit
/// over through `grant`; a waiter that gives up drops the receiver.
struct Ticket {
    id: RequestId,
    grant: oneshot::Sender<OwnedSemaphorePermit>,
}

/// Handle to an accepted request.
pub struct LoopHandle {
    pub id: RequestId,
    outcome: oneshot::Receiver<LoopOutcome>,
}

impl LoopHandle {
    /// Wait for the loop to finish.
    pub async fn outcome(self) -> LoopOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(FailureReport::internal(
                self.id,
                "supervisor dropped the loop",
                Vec::new(),
                0,
            )),
        }
    }
}

/// Owns the live loops.
pub struct LoopSupervisor {
    resources: LoopResources,
    tickets: mpsc::UnboundedSender<Ticket>,
    live: LiveMap,
    config: SupervisorConfig,
    default_budget: Budget,
    trace: TraceSink,
    collector: Arc<TraceCollector>,
    admission_task: JoinHandle<()>,
    trace_task: JoinHandle<()>,
}

impl LoopSupervisor {
    /// Build a supervisor and spawn its admission and trace tasks. Must be
    /// called inside a tokio runtime.
    pub fn new(resources: LoopResources, config: SupervisorConfig, default_budget: Budget) -> Self {
        let collector = Arc::new(TraceCollector::new(
            TRACE_REQUESTS_KEPT,
            TRACE_EVENTS_PER_REQUEST,
        ));
        let exporters: Vec<Arc<dyn TraceExporter>> = vec![collector.clone(), Arc::new(LogExporter)];
        let (trace, trace_task) = TraceSink::spawn(config.trace_buffer, exporters);

        let admission = Arc::new(Semaphore::new(config.max_concurrent_loops.max(1)));
        let (tickets, queue) = mpsc::unbounded_channel();
        let admission_task = tokio::spawn(admit_in_order(admission, queue));

        Self {
            resources: resources.with_trace(trace.clone()),
            tickets,
            live: Arc::new(Mutex::new(HashMap::new())),
            default_budget: default_budget.clamp(
                config.max_steps_cap,
                Duration::from_secs(config.max_deadline_secs),
            ),
            config,
            trace,
            collector,
            admission_task,
            trace_task,
        }
    }

    /// Budget applied when the caller does not supply one.
    pub fn default_budget(&self) -> Budget {
        self.default_budget
    }

    /// Accept a request. Its place in the admission queue is fixed before
    /// this returns; the loop runs on its own task once admitted.
    pub fn accept(&self, query: impl Into<String>, budget: Budget) -> LoopHandle {
        let id = RequestId::new();
        let query = query.into();
        let budget = budget.clamp(
            self.config.max_steps_cap,
            Duration::from_secs(self.config.max_deadline_secs),
        );
        let accepted = Instant::now();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(LoopState::new(id, query.clone(), budget, accepted).snapshot());
        let last_snapshot = snapshot_rx.clone();
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                LiveLoop {
                    cancel: cancel_tx,
                    snapshot: snapshot_rx,
                },
            );
        debug!(request_id = %id, max_steps = budget.max_steps, "Request accepted");

        let (grant, permit) = oneshot::channel();
        if self.tickets.send(Ticket { id, grant }).is_err() {
            warn!(request_id = %id, "Admission task is gone");
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let lp = ReasoningLoop::new(self.resources.clone(), id, query, budget)
            .with_clock_start(accepted)
            .with_cancel(cancel_rx.clone())
            .with_snapshots(snapshot_tx);
        let live = Arc::clone(&self.live);
        let trace = self.trace.clone();

        tokio::spawn(async move {
            let outcome = supervise(
                lp,
                permit,
                cancel_rx,
                last_snapshot,
                accepted + budget.deadline,
                trace,
            )
            .await;
            live.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
            if outcome_tx.send(outcome).is_err() {
                debug!(request_id = %id, "Caller went away before the outcome");
            }
        });

        LoopHandle {
            id,
            outcome: outcome_rx,
        }
    }

    /// Ask a loop to stop at its next step boundary. Returns `false` if no
    /// such loop is live.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        match live.get(id) {
            Some(entry) => {
                entry.cancel.send_replace(true);
                info!(request_id = %id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Latest snapshot of every live loop, oldest first.
    pub fn snapshot(&self) -> Vec<LoopSnapshot> {
        let mut snapshots: Vec<LoopSnapshot> = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.snapshot.borrow().clone())
            .collect();
        snapshots.sort_by_key(|s| s.accepted_at);
        snapshots
    }

    /// Accept a request and wait for its outcome.
    pub async fn submit_request(&self, query: impl Into<String>, budget: Budget) -> LoopOutcome {
        self.accept(query, budget).outcome().await
    }

    pub fn trace_summary(&self) -> TraceSummary {
        self.collector.summary(self.trace.dropped())
    }

    pub fn events_for(&self, id: &RequestId) -> Vec<opsloop_telemetry::TraceEvent> {
        self.collector.events_for(id)
    }

    pub fn batcher_stats(&self) -> BatcherSnapshot {
        self.resources.batcher.stats()
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.resources.tools.definitions()
    }

    pub fn backend_name(&self) -> &str {
        self.resources.batcher.backend_name()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the admission and trace tasks are still running.
    pub fn is_running(&self) -> bool {
        !self.admission_task.is_finished() && !self.trace_task.is_finished()
    }
}

/// Hand out admission permits strictly in ticket order. Tickets whose
/// waiter already gave up are skipped.
async fn admit_in_order(admission: Arc<Semaphore>, mut queue: mpsc::UnboundedReceiver<Ticket>) {
    while let Some(mut ticket) = queue.recv().await {
        if ticket.grant.is_closed() {
            continue;
        }
        let permit = tokio::select! {
            permit = Arc::clone(&admission).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = ticket.grant.closed() => continue,
        };
        if ticket.grant.send(permit).is_err() {
            // The waiter left between acquire and send; the permit drops here.
            debug!(request_id = %ticket.id, "Admission slot returned unused");
        }
    }
}

/// Wait for admission, then run the loop on its own task so a panic
/// becomes a report instead of a lost caller.
async fn supervise(
    lp: ReasoningLoop,
    permit: oneshot::Receiver<OwnedSemaphorePermit>,
    mut cancel: watch::Receiver<bool>,
    last_snapshot: watch::Receiver<LoopSnapshot>,
    deadline: Instant,
    trace: TraceSink,
) -> LoopOutcome {
    let id = lp.state().id;
    let queued_for = Instant::now();

    let permit = tokio::select! {
        permit = permit => match permit {
            Ok(permit) => permit,
            Err(_) => return Err(queued_failure(&lp, AbortReason::Internal {
                message: "admission closed".into(),
            }, &trace)),
        },
        _ = cancelled(&mut cancel) => {
            return Err(queued_failure(&lp, AbortReason::Cancelled, &trace));
        }
        _ = tokio::time::sleep_until(deadline) => {
            return Err(queued_failure(&lp, AbortReason::DeadlineExceeded, &trace));
        }
    };
    debug!(
        request_id = %id,
        queued_ms = queued_for.elapsed().as_millis() as u64,
        "Loop admitted"
    );

    let joined = tokio::spawn(lp.run()).await;
    drop(permit);

    match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(request_id = %id, error = %e, "Loop task died");
            let last = last_snapshot.borrow().clone();
            Err(FailureReport::internal(id, e.to_string(), last.history, last.elapsed_ms))
        }
    }
}

/// Resolves once `cancel` turns `true`; never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn queued_failure(lp: &ReasoningLoop, reason: AbortReason, trace: &TraceSink) -> FailureReport {
    let state = lp.state();
    info!(request_id = %state.id, reason = reason.kind(), "Request ended while queued");
    trace.emit(opsloop_telemetry::TraceEvent::aborted(
        state.id,
        0,
        opsloop_core::StepPhase::Think,
        &reason,
    ));
    FailureReport::new(state.id, reason, Vec::new(), state.elapsed_ms())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use opsloop_core::{LoopStatus, Prompt, ToolRegistry};
    use opsloop_inference::ScriptedBackend;
    use std::sync::atomic::Ordering;

    fn config(max_concurrent_loops: usize) -> SupervisorConfig {
        SupervisorConfig {
            max_concurrent_loops,
            ..SupervisorConfig::default()
        }
    }

    fn supervisor(
        backend: Arc<dyn opsloop_core::InferenceBackend>,
        tools: ToolRegistry,
        max_concurrent_loops: usize,
    ) -> LoopSupervisor {
        LoopSupervisor::new(resources(backend, tools), config(max_concurrent_loops), Budget::default())
    }

    fn phases_of(history: &[opsloop_core::ReasoningStep]) -> Vec<opsloop_core::StepPhase> {
        history.iter().map(|s| s.phase).collect()
    }

    fn query_of(prompt: &Prompt) -> String {
        prompt.last_user_text().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn submit_request_returns_answer_and_forgets_loop() {
        let backend = Arc::new(ScriptedBackend::sequence(vec![call("ok"), answer("prod is fine")]));
        let sup = supervisor(backend, ToolRegistry::new().with(OkTool), 4);

        let done = sup.submit_request("check prod", sup.default_budget()).await.unwrap();
        assert_eq!(done.answer, "prod is fine");
        assert_eq!(done.history.len(), 3);
        assert!(sup.snapshot().is_empty());
        assert_eq!(sup.live_count(), 0);
        assert!(!sup.cancel(&done.request_id));
    }

    #[tokio::test]
    async fn admission_is_fifo() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let backend = Arc::new(ScriptedBackend::from_fn(move |prompt| {
            recorder.lock().unwrap().push(query_of(prompt));
            answer("done")
        }));
        let sup = supervisor(backend, ToolRegistry::new(), 1);

        let handles: Vec<LoopHandle> = ["first", "second", "third"]
            .into_iter()
            .map(|q| sup.accept(q, sup.default_budget()))
            .collect();
        for handle in handles {
            handle.outcome().await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn admission_is_fifo_across_worker_threads() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let backend = Arc::new(ScriptedBackend::from_fn(move |prompt| {
            recorder.lock().unwrap().push(query_of(prompt));
            answer("done")
        }));
        let sup = Arc::new(supervisor(backend, ToolRegistry::new(), 1));

        let acceptor = Arc::clone(&sup);
        let handles: Vec<LoopHandle> = tokio::spawn(async move {
            ["first", "second", "third", "fourth"]
                .into_iter()
                .map(|q| acceptor.accept(q, acceptor.default_budget()))
                .collect()
        })
        .await
        .unwrap();
        for handle in handles {
            handle.outcome().await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third", "fourth"]);
        assert!(sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_request_past_its_deadline_fails_without_history() {
        let slow = SlowTool::new(Duration::from_secs(10));
        let started = slow.started.clone();
        let backend = Arc::new(ScriptedBackend::from_fn(|prompt| {
            if prompt.messages.iter().any(|m| m.role == opsloop_core::Role::Tool) {
                answer("done")
            } else {
                call("slow")
            }
        }));
        let sup = supervisor(backend.clone(), ToolRegistry::new().with(slow), 1);

        let running = sup.accept("running", Budget::new(4, Duration::from_secs(60)));
        started.notified().await;
        let queued = sup.accept("queued", Budget::new(4, Duration::from_secs(1)));

        let report = queued.outcome().await.unwrap_err();
        assert_eq!(report.reason, AbortReason::DeadlineExceeded);
        assert!(report.history.is_empty());
        assert_eq!(backend.calls(), 1);

        // The expired ticket does not hold the slot once the running loop ends.
        running.outcome().await.unwrap();
        let next = sup.submit_request("after", Budget::new(4, Duration::from_secs(60))).await;
        assert_eq!(next.unwrap().answer, "done");
    }

    #[tokio::test]
    async fn queued_loops_are_visible_as_queued() {
        let slow = SlowTool::new(Duration::from_millis(100));
        let started = slow.started.clone();
        let backend = Arc::new(ScriptedBackend::from_fn(|prompt| {
            if prompt.messages.iter().any(|m| m.role == opsloop_core::Role::Tool) {
                answer("done")
            } else {
                call("slow")
            }
        }));
        let sup = supervisor(backend, ToolRegistry::new().with(slow), 1);

        let running = sup.accept("running", sup.default_budget());
        started.notified().await;
        let waiting = sup.accept("waiting", sup.default_budget());
        tokio::task::yield_now().await;

        let snaps = sup.snapshot();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].status, LoopStatus::Running);
        assert_eq!(snaps[1].status, LoopStatus::Queued);
        assert_eq!(snaps[1].query, "waiting");

        running.outcome().await.unwrap();
        waiting.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn cancelling_a_queued_request_ends_it_immediately() {
        let slow = SlowTool::new(Duration::from_millis(200));
        let started = slow.started.clone();
        let finished = slow.finished.clone();
        let backend = Arc::new(ScriptedBackend::from_fn(|prompt| {
            if prompt.messages.iter().any(|m| m.role == opsloop_core::Role::Tool) {
                answer("done")
            } else {
                call("slow")
            }
        }));
        let sup = supervisor(backend, ToolRegistry::new().with(slow), 1);

        let running = sup.accept("running", sup.default_budget());
        started.notified().await;
        let queued = sup.accept("queued", sup.default_budget());
        assert!(sup.cancel(&queued.id));

        let report = queued.outcome().await.unwrap_err();
        assert_eq!(report.reason, AbortReason::Cancelled);
        assert!(report.history.is_empty());
        assert!(!finished.load(Ordering::SeqCst));

        running.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn caller_budgets_are_clamped() {
        let backend = Arc::new(ScriptedBackend::from_fn(|_| call("ok")));
        let config = SupervisorConfig {
            max_steps_cap: 2,
            ..SupervisorConfig::default()
        };
        let sup = LoopSupervisor::new(
            resources(backend, ToolRegistry::new().with(OkTool)),
            config,
            Budget::default(),
        );

        let report = sup
            .submit_request("spin", Budget::new(50, Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert_eq!(report.reason, AbortReason::StepLimitExceeded { limit: 2 });
        assert_eq!(sup.default_budget().max_steps, 2);
    }

    #[tokio::test]
    async fn cancel_unknown_loop_is_false() {
        let sup = supervisor(Arc::new(ScriptedBackend::sequence(vec![])), ToolRegistry::new(), 1);
        assert!(!sup.cancel(&RequestId::new()));
    }

    #[tokio::test]
    async fn panicking_loop_becomes_internal_report() {
        let backend = Arc::new(ScriptedBackend::sequence(vec![call("panics"), answer("still here")]));
        let sup = supervisor(backend, ToolRegistry::new().with(PanickingTool), 1);

        let report = sup.submit_request("crash", sup.default_budget()).await.unwrap_err();
        assert_eq!(report.reason.kind(), "internal");
        assert_eq!(phases_of(&report.history), vec![opsloop_core::StepPhase::Act]);
        assert_eq!(sup.live_count(), 0);

        // The only admission slot was released.
        let done = sup.submit_request("again", sup.default_budget()).await.unwrap();
        assert_eq!(done.answer, "still here");
    }

    #[tokio::test]
    async fn trace_summary_counts_steps() {
        let backend = Arc::new(ScriptedBackend::sequence(vec![call("ok"), answer("done")]));
        let sup = supervisor(backend, ToolRegistry::new().with(OkTool), 2);
        let done = sup.submit_request("trace", sup.default_budget()).await.unwrap();

        // The collector drains asynchronously.
        for _ in 0..50 {
            if sup.trace_summary().total_events >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let summary = sup.trace_summary();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.dropped_events, 0);
        assert_eq!(sup.events_for(&done.request_id).len(), 3);
        assert_eq!(sup.batcher_stats().requests_served, 2);
    }
}
