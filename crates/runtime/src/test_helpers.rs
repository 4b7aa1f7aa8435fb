//! Shared fixtures for loop and supervisor tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use opsloop_core::{
    Generation, InferenceBackend, KnowledgeRetriever, RetrievalError, Snippet, Tool, ToolError,
    ToolOutput, ToolRegistry,
};
use opsloop_inference::{BatcherConfig, InferenceBatcher};
use tokio::sync::Notify;

use crate::budget::LoopPolicy;
use crate::reasoning::LoopResources;

/// Batches of one, dispatched immediately.
pub fn immediate_batcher(backend: Arc<dyn InferenceBackend>) -> Arc<InferenceBatcher> {
    Arc::new(InferenceBatcher::new(
        backend,
        BatcherConfig {
            max_batch_size: 1,
            max_wait: Duration::from_millis(1),
            backend_timeout: Duration::from_secs(600),
            max_inflight_batches: 4,
        },
    ))
}

pub fn resources(backend: Arc<dyn InferenceBackend>, tools: ToolRegistry) -> LoopResources {
    LoopResources::new(immediate_batcher(backend), Arc::new(tools), Arc::new(LoopPolicy::default()))
}

/// Chainable registration for test registries.
pub trait RegistryExt {
    fn with(self, tool: impl Tool + 'static) -> Self;
}

impl RegistryExt for ToolRegistry {
    fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool)).unwrap();
        self
    }
}

pub fn call(name: &str) -> Result<Generation, opsloop_core::InferenceError> {
    Ok(Generation::tool_call(name, serde_json::json!({})))
}

pub fn answer(text: &str) -> Result<Generation, opsloop_core::InferenceError> {
    Ok(Generation::answer(text))
}

fn no_args() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Always succeeds with "ok".
pub struct OkTool;

#[async_trait]
impl Tool for OkTool {
    fn name(&self) -> &str {
        "ok"
    }
    fn description(&self) -> &str {
        "Always succeeds"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        no_args()
    }
    async fn execute(&self, _: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text("ok"))
    }
}

/// Always fails.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        no_args()
    }
    async fn execute(&self, _: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Sleeps, then succeeds. Signals `started` on entry and sets `finished` on exit.
pub struct SlowTool {
    pub delay: Duration,
    pub started: Arc<Notify>,
    pub finished: Arc<AtomicBool>,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Arc::new(Notify::new()),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Takes its time"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        no_args()
    }
    async fn execute(&self, _: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(ToolOutput::text("slow done"))
    }
}

/// Panics when executed.
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panics"
    }
    fn description(&self) -> &str {
        "Crashes the loop task"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        no_args()
    }
    async fn execute(&self, _: serde_json::Value) -> Result<ToolOutput, ToolError> {
        panic!("tool blew up");
    }
}

/// Retriever returning fixed snippets, or failing.
pub struct FixedRetriever {
    pub snippets: Vec<Snippet>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FixedRetriever {
    pub fn returning(snippets: Vec<Snippet>) -> Self {
        Self {
            snippets,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            snippets: vec![],
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl KnowledgeRetriever for FixedRetriever {
    async fn retrieve(&self, _: &str, k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RetrievalError::Unavailable("index offline".into()));
        }
        Ok(self.snippets.iter().take(k).cloned().collect())
    }
}
