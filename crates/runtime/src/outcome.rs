//! What a caller gets back from a loop.

use opsloop_core::{AbortReason, ReasoningStep, RequestId, StepPhase, ToolInvocation};
use serde::Serialize;

/// A successful loop: the answer plus how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct FinalAnswer {
    pub request_id: RequestId,
    pub answer: String,
    pub history: Vec<ReasoningStep>,
    pub think_steps: u32,
    pub elapsed_ms: u64,
}

impl FinalAnswer {
    /// Settled tool invocations, in order.
    pub fn actions_taken(&self) -> Vec<&ToolInvocation> {
        self.history
            .iter()
            .filter(|s| s.phase == StepPhase::Observe)
            .filter_map(|s| s.invocation.as_ref())
            .collect()
    }
}

/// A loop that ended without an answer.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct FailureReport {
    pub request_id: RequestId,
    pub reason: AbortReason,
    pub message: String,
    pub history: Vec<ReasoningStep>,
    pub elapsed_ms: u64,
}

impl FailureReport {
    pub fn new(
        request_id: RequestId,
        reason: AbortReason,
        history: Vec<ReasoningStep>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            request_id,
            message: reason.to_string(),
            reason,
            history,
            elapsed_ms,
        }
    }

    /// Report for a loop whose task died before producing an outcome.
    pub fn internal(
        request_id: RequestId,
        message: impl Into<String>,
        history: Vec<ReasoningStep>,
        elapsed_ms: u64,
    ) -> Self {
        Self::new(
            request_id,
            AbortReason::Internal {
                message: message.into(),
            },
            history,
            elapsed_ms,
        )
    }
}

pub type LoopOutcome = Result<FinalAnswer, FailureReport>;
