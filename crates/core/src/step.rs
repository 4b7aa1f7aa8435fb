//! Reasoning step records and loop lifecycle types.
//!
//! A loop's history is an append-only list of [`ReasoningStep`]s. Steps are
//! immutable once recorded; snapshots and reports clone them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ToolError;
use crate::tool::ToolOutput;

/// Unique identifier for one accepted request (and its loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Phase tag of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Think,
    Act,
    Observe,
    Final,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Think => "think",
            Self::Act => "act",
            Self::Observe => "observe",
            Self::Final => "final",
        }
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settled result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationResult {
    Ok(ToolOutput),
    Err(ToolError),
}

impl From<Result<ToolOutput, ToolError>> for InvocationResult {
    fn from(result: Result<ToolOutput, ToolError>) -> Self {
        match result {
            Ok(output) => Self::Ok(output),
            Err(e) => Self::Err(e),
        }
    }
}

/// Record of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,

    /// Arguments as proposed by the model (a JSON object)
    pub arguments: serde_json::Value,

    /// `None` while the call is pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<InvocationResult>,

    pub elapsed_ms: u64,
}

impl ToolInvocation {
    /// A pending invocation, as recorded on an `act` step.
    pub fn pending(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            result: None,
            elapsed_ms: 0,
        }
    }

    /// Settle this invocation with the registry's result.
    pub fn settle(mut self, result: Result<ToolOutput, ToolError>, elapsed_ms: u64) -> Self {
        self.result = Some(result.into());
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.result, Some(InvocationResult::Ok(_)))
    }

    /// Text fed back to the model as the observation.
    pub fn render_observation(&self) -> String {
        match &self.result {
            Some(InvocationResult::Ok(output)) => output.content.clone(),
            Some(InvocationResult::Err(e)) => format!("Error ({}): {e}", e.kind()),
            None => String::from("(pending)"),
        }
    }
}

/// One entry of a loop's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-based position in the history
    pub seq: u32,
    pub phase: StepPhase,

    /// Raw model output, or the rendered observation
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<ToolInvocation>,

    /// Set when retrieval was skipped or failed before this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_note: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl ReasoningStep {
    pub fn new(seq: u32, phase: StepPhase, output: impl Into<String>) -> Self {
        Self {
            seq,
            phase,
            output: output.into(),
            invocation: None,
            retrieval_note: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_invocation(mut self, invocation: ToolInvocation) -> Self {
        self.invocation = Some(invocation);
        self
    }

    pub fn with_retrieval_note(mut self, note: Option<String>) -> Self {
        self.retrieval_note = note;
        self
    }
}

/// Lifecycle status of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Why a loop ended without an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    StepLimitExceeded { limit: u32 },
    DeadlineExceeded,
    Cancelled,
    InferenceFailure { error: String },
    ToolFailureLimitExceeded { consecutive: u32 },
    /// The loop task died unexpectedly.
    Internal { message: String },
}

impl AbortReason {
    /// Stable snake_case tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepLimitExceeded { .. } => "step_limit_exceeded",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::InferenceFailure { .. } => "inference_failure",
            Self::ToolFailureLimitExceeded { .. } => "tool_failure_limit_exceeded",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::StepLimitExceeded { .. } | Self::DeadlineExceeded)
    }

    /// Terminal status a loop ends in for this reason.
    pub fn status(&self) -> LoopStatus {
        match self {
            Self::Cancelled => LoopStatus::Cancelled,
            _ => LoopStatus::Failed,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepLimitExceeded { limit } => write!(f, "step limit of {limit} think phases exceeded"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::InferenceFailure { error } => write!(f, "inference failed: {error}"),
            Self::ToolFailureLimitExceeded { consecutive } => {
                write!(f, "{consecutive} consecutive tool failures")
            }
            Self::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}
