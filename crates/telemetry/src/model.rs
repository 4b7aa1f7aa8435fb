//! Data model for step trace events.

use chrono::{DateTime, Utc};
use opsloop_core::{AbortReason, ReasoningStep, RequestId, StepPhase};
use serde::{Deserialize, Serialize};

/// How a traced step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TraceOutcome {
    Ok,
    /// The step recorded a failure (failed inference attempt, failed tool).
    Failed { kind: String },
    /// The loop stopped at this point.
    Aborted { reason: String },
}

impl TraceOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// One traced unit of loop work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub request_id: RequestId,
    /// Sequence number of the step (0 when a loop aborts before its first step)
    pub step_index: u32,
    pub phase: StepPhase,
    pub duration_ms: u64,
    pub outcome: TraceOutcome,
    pub timestamp: DateTime<Utc>,
}

impl TraceEvent {
    /// Event for a freshly recorded step.
    pub fn for_step(request_id: RequestId, step: &ReasoningStep, duration_ms: u64, outcome: TraceOutcome) -> Self {
        Self {
            request_id,
            step_index: step.seq,
            phase: step.phase,
            duration_ms,
            outcome,
            timestamp: step.timestamp,
        }
    }

    /// Event for a loop that stopped before running `phase`.
    pub fn aborted(request_id: RequestId, step_index: u32, phase: StepPhase, reason: &AbortReason) -> Self {
        Self {
            request_id,
            step_index,
            phase,
            duration_ms: 0,
            outcome: TraceOutcome::Aborted {
                reason: reason.kind().to_string(),
            },
            timestamp: Utc::now(),
        }
    }
}
