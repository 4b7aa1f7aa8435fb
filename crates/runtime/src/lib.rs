//! The OpsLoop runtime: reasoning loops and the supervisor that runs them.
//!
//! Every request becomes a [`ReasoningLoop`] following a **Think → Act →
//! Observe** cycle:
//!
//! 1. **Think**: retrieve runbook context, ask the model (through the shared
//!    inference batcher) for an answer or a tool call
//! 2. **Act**: run the proposed tool through the registry
//! 3. **Observe**: record the result and think again
//!
//! The loop ends with a final answer, or with a failure report once a budget
//! runs out, tools keep failing, inference keeps failing, or the caller
//! cancels. The [`LoopSupervisor`] admits loops in arrival order under a
//! global concurrency limit.

pub mod bootstrap;
pub mod budget;
pub mod outcome;
pub mod prompt;
pub mod reasoning;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bootstrap::{build_supervisor, build_supervisor_with_backend, default_budget};
pub use budget::{Budget, LoopPolicy, RetryPolicy};
pub use outcome::{FailureReport, FinalAnswer, LoopOutcome};
pub use prompt::{DEFAULT_SYSTEM_PROMPT, build_prompt};
pub use reasoning::{LoopResources, Phase, ReasoningLoop};
pub use state::{LoopSnapshot, LoopState};
pub use supervisor::{LoopHandle, LoopSupervisor};
