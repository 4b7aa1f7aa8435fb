//! Loop-owned state and the read-only snapshot published from it.

use chrono::{DateTime, Utc};
use opsloop_core::{LoopStatus, ReasoningStep, RequestId, StepPhase};
use serde::Serialize;
use tokio::time::Instant;

use crate::budget::Budget;

/// Mutable state of one reasoning loop. Only the loop task touches it.
#[derive(Debug)]
pub struct LoopState {
    pub id: RequestId,
    pub query: String,
    pub budget: Budget,
    pub status: LoopStatus,
    history: Vec<ReasoningStep>,
    think_count: u32,
    consecutive_tool_failures: u32,
    retrieval_omissions: u32,
    pending_retrieval_note: Option<String>,
    accepted_at: DateTime<Utc>,
    started: Instant,
    deadline: Instant,
}

impl LoopState {
    /// State for a loop whose clock started at `started`.
    pub fn new(id: RequestId, query: impl Into<String>, budget: Budget, started: Instant) -> Self {
        Self {
            id,
            query: query.into(),
            budget,
            status: LoopStatus::Queued,
            history: Vec::new(),
            think_count: 0,
            consecutive_tool_failures: 0,
            retrieval_omissions: 0,
            pending_retrieval_note: None,
            accepted_at: Utc::now(),
            started,
            deadline: started + budget.deadline,
        }
    }

    pub fn history(&self) -> &[ReasoningStep] {
        &self.history
    }

    pub fn into_history(self) -> Vec<ReasoningStep> {
        self.history
    }

    pub fn think_count(&self) -> u32 {
        self.think_count
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_overdue(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Count a think phase. Returns `false` once the step budget is spent.
    pub fn begin_think(&mut self) -> bool {
        if self.think_count >= self.budget.max_steps {
            return false;
        }
        self.think_count += 1;
        true
    }

    /// Append a step. Any pending retrieval note is attached to it.
    pub fn record(&mut self, step: ReasoningStep) -> &ReasoningStep {
        let note = self.pending_retrieval_note.take();
        let step = if step.retrieval_note.is_none() {
            step.with_retrieval_note(note)
        } else {
            step
        };
        self.history.push(step);
        &self.history[self.history.len() - 1]
    }

    /// Sequence number the next recorded step will get.
    pub fn next_seq(&self) -> u32 {
        self.history.len() as u32 + 1
    }

    pub fn note_retrieval_failure(&mut self, note: String) {
        self.retrieval_omissions += 1;
        self.pending_retrieval_note = Some(note);
    }

    pub fn retrieval_omissions(&self) -> u32 {
        self.retrieval_omissions
    }

    /// Update the failure streak after a tool call and return it.
    pub fn track_tool_result(&mut self, succeeded: bool) -> u32 {
        if succeeded {
            self.consecutive_tool_failures = 0;
        } else {
            self.consecutive_tool_failures += 1;
        }
        self.consecutive_tool_failures
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            id: self.id,
            query: self.query.clone(),
            status: self.status,
            think_count: self.think_count,
            max_steps: self.budget.max_steps,
            consecutive_tool_failures: self.consecutive_tool_failures,
            retrieval_omissions: self.retrieval_omissions,
            elapsed_ms: self.elapsed_ms(),
            accepted_at: self.accepted_at,
            history: self.history.clone(),
        }
    }
}

/// Point-in-time view of a loop, safe to hand to any reader.
#[derive(Debug, Clone, Serialize)]
pub struct LoopSnapshot {
    pub id: RequestId,
    pub query: String,
    pub status: LoopStatus,
    pub think_count: u32,
    pub max_steps: u32,
    pub consecutive_tool_failures: u32,
    pub retrieval_omissions: u32,
    pub elapsed_ms: u64,
    pub accepted_at: DateTime<Utc>,
    pub history: Vec<ReasoningStep>,
}

impl LoopSnapshot {
    pub fn last_phase(&self) -> Option<StepPhase> {
        self.history.last().map(|s| s.phase)
    }
}
