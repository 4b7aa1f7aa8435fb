//! The reasoning loop: a bounded Think → Act → Observe state machine.
//!
//! Each call to [`ReasoningLoop::advance`] performs exactly one transition:
//!
//! - **Thinking**: retrieve context, ask the batcher for a generation.
//!   A tool proposal is recorded as an `act` step and moves to `Acting`;
//!   a direct answer is recorded as a `final` step and ends the loop.
//! - **Acting**: run the proposal through the tool registry.
//! - **Observing**: record the tool result as an `observe` step and go back
//!   to `Thinking`, unless too many tools have failed in a row.
//!
//! Cancellation and the deadline are checked before every think and every
//! act. A tool call that has started always runs to completion.

use std::sync::Arc;

use opsloop_core::{
    AbortReason, Generation, InvocationResult, KnowledgeRetriever, LoopStatus, ReasoningStep,
    RequestId, RetrievalError, Snippet, StepPhase, ToolInvocation, ToolProposal, ToolRegistry,
};
use opsloop_inference::InferenceBatcher;
use opsloop_telemetry::{TraceEvent, TraceOutcome, TraceSink};
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::budget::{Budget, LoopPolicy};
use crate::outcome::{FailureReport, FinalAnswer, LoopOutcome};
use crate::prompt::build_prompt;
use crate::state::{LoopSnapshot, LoopState};

/// Where the loop currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Thinking,
    Acting(ToolProposal),
    Observing(ToolInvocation),
    Succeeded(String),
    Aborted(AbortReason),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Aborted(_))
    }

    fn step_phase(&self) -> StepPhase {
        match self {
            Self::Thinking => StepPhase::Think,
            Self::Acting(_) => StepPhase::Act,
            Self::Observing(_) => StepPhase::Observe,
            Self::Succeeded(_) | Self::Aborted(_) => StepPhase::Final,
        }
    }
}

/// Everything a loop borrows from its supervisor.
#[derive(Clone)]
pub struct LoopResources {
    pub batcher: Arc<InferenceBatcher>,
    pub tools: Arc<ToolRegistry>,
    pub policy: Arc<LoopPolicy>,
    pub retriever: Option<Arc<dyn KnowledgeRetriever>>,
    pub trace: Option<TraceSink>,
}

impl LoopResources {
    pub fn new(
        batcher: Arc<InferenceBatcher>,
        tools: Arc<ToolRegistry>,
        policy: Arc<LoopPolicy>,
    ) -> Self {
        Self {
            batcher,
            tools,
            policy,
            retriever: None,
            trace: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_trace(mut self, trace: TraceSink) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// One request's reasoning loop.
pub struct ReasoningLoop {
    resources: LoopResources,
    state: LoopState,
    phase: Phase,
    cancel: Option<watch::Receiver<bool>>,
    snapshots: Option<watch::Sender<LoopSnapshot>>,
}

impl ReasoningLoop {
    /// A loop whose clock starts now.
    pub fn new(
        resources: LoopResources,
        id: RequestId,
        query: impl Into<String>,
        budget: Budget,
    ) -> Self {
        Self {
            resources,
            state: LoopState::new(id, query, budget, Instant::now()),
            phase: Phase::Thinking,
            cancel: None,
            snapshots: None,
        }
    }

    /// Measure elapsed time and the deadline from `started` instead.
    pub fn with_clock_start(mut self, started: Instant) -> Self {
        let query = std::mem::take(&mut self.state.query);
        self.state = LoopState::new(self.state.id, query, self.state.budget, started);
        self
    }

    /// Abort at the next step boundary once `cancel` turns `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Publish a snapshot after every transition.
    pub fn with_snapshots(mut self, snapshots: watch::Sender<LoopSnapshot>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Drive the loop to a terminal phase.
    pub async fn run(mut self) -> LoopOutcome {
        self.state.status = LoopStatus::Running;
        info!(
            request_id = %self.state.id,
            max_steps = self.state.budget.max_steps,
            deadline_ms = self.state.budget.deadline.as_millis() as u64,
            "Reasoning loop started"
        );
        self.publish();

        while !self.phase.is_terminal() {
            self.advance().await;
        }
        self.finish()
    }

    /// Perform one transition. Does nothing once the loop is terminal.
    pub async fn advance(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        let attempted = self.phase.step_phase();
        let phase = std::mem::replace(&mut self.phase, Phase::Thinking);
        self.phase = match phase {
            Phase::Thinking => self.think().await,
            Phase::Acting(proposal) => self.act(proposal).await,
            Phase::Observing(invocation) => self.observe(invocation),
            terminal => terminal,
        };

        if let Phase::Aborted(reason) = &self.phase {
            if let Some(trace) = &self.resources.trace {
                let last_seq = self.state.next_seq() - 1;
                trace.emit(TraceEvent::aborted(self.state.id, last_seq, attempted, reason));
            }
        }
        self.publish();
    }

    fn interrupted(&self) -> Option<AbortReason> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(AbortReason::Cancelled);
        }
        if self.state.is_overdue() {
            return Some(AbortReason::DeadlineExceeded);
        }
        None
    }

    async fn think(&mut self) -> Phase {
        if let Some(reason) = self.interrupted() {
            return Phase::Aborted(reason);
        }
        if !self.state.begin_think() {
            return Phase::Aborted(AbortReason::StepLimitExceeded {
                limit: self.state.budget.max_steps,
            });
        }

        let snippets = match self.retrieve().await {
            Ok(snippets) => snippets,
            Err(reason) => return Phase::Aborted(reason),
        };
        let prompt = build_prompt(
            &self.resources.policy,
            self.resources.tools.definitions(),
            &self.state.query,
            &snippets,
            self.state.history(),
        );

        let retry = self.resources.policy.retry.clone();
        let mut retries = 0;
        loop {
            let started = Instant::now();
            let submitted = self.resources.batcher.submit(
                self.state.id,
                &self.resources.policy.model,
                prompt.clone(),
            );
            let Ok(result) = timeout_at(self.state.deadline(), submitted).await else {
                return Phase::Aborted(AbortReason::DeadlineExceeded);
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let error = match result {
                Ok(generation) => return self.interpret(generation, duration_ms),
                Err(e) => e,
            };
            warn!(
                request_id = %self.state.id,
                attempt = retries + 1,
                error = %error,
                "Inference attempt failed"
            );
            let seq = self.state.next_seq();
            self.record(
                ReasoningStep::new(seq, StepPhase::Think, format!("inference failed: {error}")),
                duration_ms,
                TraceOutcome::Failed {
                    kind: "inference_failure".into(),
                },
            );

            if retries >= retry.max_retries {
                return Phase::Aborted(AbortReason::InferenceFailure {
                    error: error.to_string(),
                });
            }
            retries += 1;

            let delay = retry.delay_for(retries);
            if !delay.is_zero()
                && timeout_at(self.state.deadline(), tokio::time::sleep(delay))
                    .await
                    .is_err()
            {
                return Phase::Aborted(AbortReason::DeadlineExceeded);
            }
            if let Some(reason) = self.interrupted() {
                return Phase::Aborted(reason);
            }
        }
    }

    fn interpret(&mut self, generation: Generation, duration_ms: u64) -> Phase {
        let raw = generation.raw_output();
        let seq = self.state.next_seq();
        match generation {
            Generation::Answer { text } => {
                self.record(
                    ReasoningStep::new(seq, StepPhase::Final, raw),
                    duration_ms,
                    TraceOutcome::Ok,
                );
                Phase::Succeeded(text)
            }
            Generation::ToolCall { proposal, .. } => {
                debug!(request_id = %self.state.id, tool = %proposal.name, "Model proposed a tool call");
                let pending = ToolInvocation::pending(proposal.name.clone(), proposal.arguments.clone());
                self.record(
                    ReasoningStep::new(seq, StepPhase::Act, raw).with_invocation(pending),
                    duration_ms,
                    TraceOutcome::Ok,
                );
                Phase::Acting(proposal)
            }
        }
    }

    async fn act(&mut self, proposal: ToolProposal) -> Phase {
        if let Some(reason) = self.interrupted() {
            return Phase::Aborted(reason);
        }

        info!(request_id = %self.state.id, tool = %proposal.name, "Invoking tool");
        let started = Instant::now();
        let result = self
            .resources
            .tools
            .invoke(&proposal.name, proposal.arguments.clone())
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        Phase::Observing(
            ToolInvocation::pending(proposal.name, proposal.arguments).settle(result, elapsed_ms),
        )
    }

    fn observe(&mut self, invocation: ToolInvocation) -> Phase {
        let outcome = match &invocation.result {
            Some(InvocationResult::Err(e)) => TraceOutcome::Failed {
                kind: e.kind().to_string(),
            },
            _ => TraceOutcome::Ok,
        };
        let succeeded = invocation.succeeded();
        let elapsed_ms = invocation.elapsed_ms;
        let seq = self.state.next_seq();
        self.record(
            ReasoningStep::new(seq, StepPhase::Observe, invocation.render_observation())
                .with_invocation(invocation),
            elapsed_ms,
            outcome,
        );

        let streak = self.state.track_tool_result(succeeded);
        if streak >= self.resources.policy.max_consecutive_tool_failures {
            return Phase::Aborted(AbortReason::ToolFailureLimitExceeded {
                consecutive: streak,
            });
        }
        Phase::Thinking
    }

    /// Best-effort context lookup. Only an expired deadline is fatal.
    async fn retrieve(&mut self) -> Result<Vec<Snippet>, AbortReason> {
        let Some(retriever) = self.resources.retriever.clone() else {
            return Ok(Vec::new());
        };
        let top_k = self.resources.policy.retrieval_top_k;
        let timeout = self.resources.policy.retrieval_timeout;
        let limit = (Instant::now() + timeout).min(self.state.deadline());

        let error = match timeout_at(limit, retriever.retrieve(&self.state.query, top_k)).await {
            Ok(Ok(snippets)) => {
                debug!(request_id = %self.state.id, found = snippets.len(), "Retrieved context");
                return Ok(snippets);
            }
            Ok(Err(e)) => e,
            Err(_) if self.state.is_overdue() => return Err(AbortReason::DeadlineExceeded),
            Err(_) => RetrievalError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
        };

        warn!(request_id = %self.state.id, error = %error, "Retrieval failed, continuing without context");
        self.state
            .note_retrieval_failure(format!("retrieval failed: {error}"));
        Ok(Vec::new())
    }

    fn record(&mut self, step: ReasoningStep, duration_ms: u64, outcome: TraceOutcome) {
        let id = self.state.id;
        let step = self.state.record(step);
        debug!(request_id = %id, seq = step.seq, phase = %step.phase, "Step recorded");
        if let Some(trace) = &self.resources.trace {
            trace.emit(TraceEvent::for_step(id, step, duration_ms, outcome));
        }
    }

    fn publish(&self) {
        if let Some(tx) = &self.snapshots {
            tx.send_replace(self.state.snapshot());
        }
    }

    fn finish(mut self) -> LoopOutcome {
        let phase = std::mem::replace(&mut self.phase, Phase::Thinking);
        let id = self.state.id;
        let elapsed_ms = self.state.elapsed_ms();
        let think_steps = self.state.think_count();

        match phase {
            Phase::Succeeded(answer) => {
                self.state.status = LoopStatus::Succeeded;
                self.publish();
                info!(request_id = %id, think_steps, elapsed_ms, "Reasoning loop succeeded");
                Ok(FinalAnswer {
                    request_id: id,
                    answer,
                    history: self.state.into_history(),
                    think_steps,
                    elapsed_ms,
                })
            }
            Phase::Aborted(reason) => {
                self.state.status = reason.status();
                self.publish();
                warn!(request_id = %id, reason = reason.kind(), think_steps, elapsed_ms, "Reasoning loop aborted");
                Err(FailureReport::new(id, reason, self.state.into_history(), elapsed_ms))
            }
            _ => Err(FailureReport::internal(
                id,
                "loop stopped before reaching a terminal phase",
                self.state.into_history(),
                elapsed_ms,
            )),
        }
    }
}
