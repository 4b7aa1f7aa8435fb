//! Error types for the OpsLoop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `Error` wraps them all.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all OpsLoop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Inference errors ---
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures on the model side of a think step.
///
/// `Clone` because a failed batch hands the same error to every member.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("Backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Backend request failed with status {status_code}: {message}")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Backend timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed model output: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Inference batcher is shut down")]
    BatcherClosed,
}

/// Typed tool failures. These are fed back to the model as observations.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool {tool_name} failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },
}

impl ToolError {
    /// Stable snake_case tag for reports and traces.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Timeout { .. } => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetrievalError {
    #[error("Knowledge base unavailable: {0}")]
    Unavailable(String),

    #[error("Retrieval query failed: {0}")]
    QueryFailed(String),

    #[error("Retrieval timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}
