//! # OpsLoop Core
//!
//! Domain types, traits, and error definitions for the OpsLoop agent runtime.
//! Every seam of the system (model serving, tools, knowledge retrieval) is a
//! trait here; implementations live in their own crates and all crates depend
//! inward on this one.

pub mod error;
pub mod inference;
pub mod knowledge;
pub mod message;
pub mod step;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, InferenceError, Result, RetrievalError, ToolError};
pub use inference::{Generation, InferenceBackend, ItemResult, Prompt, ToolDefinition, ToolProposal};
pub use knowledge::{KnowledgeRetriever, Snippet};
pub use message::{Message, MessageToolCall, Role};
pub use step::{
    AbortReason, InvocationResult, LoopStatus, ReasoningStep, RequestId, StepPhase, ToolInvocation,
};
pub use tool::{Tool, ToolOutput, ToolRegistry};
