//! Inference for OpsLoop: the batching multiplexer and model backends.
//!
//! All backends implement `opsloop_core::InferenceBackend`. Reasoning loops
//! never call a backend directly; they go through the [`InferenceBatcher`].

pub mod batch;
pub mod batcher;
pub mod function_call;
pub mod openai_compat;
pub mod scripted;

pub use batch::{Batch, CloseReason, InferenceRequest};
pub use batcher::{BatcherConfig, BatcherSnapshot, BatcherStats, InferenceBatcher};
pub use openai_compat::OpenAiCompatBackend;
pub use scripted::ScriptedBackend;
