//! Deterministic in-process backend.
//!
//! Answers from a script instead of a model. Used by tests across the
//! workspace and by `opsloop ask --offline` for demos without a model server.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use opsloop_core::{Generation, InferenceBackend, InferenceError, ItemResult, Prompt};

type ScriptFn = Box<dyn Fn(&Prompt) -> ItemResult + Send + Sync>;

enum Script {
    /// One entry consumed per prompt, in dispatch order
    Sequence(Mutex<VecDeque<ItemResult>>),
    /// Computed from each prompt
    Func(ScriptFn),
    /// Every batch fails as a whole
    Fail(InferenceError),
}

pub struct ScriptedBackend {
    script: Script,
    delay: Option<Duration>,
    fixed_count: Option<usize>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl ScriptedBackend {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: None,
            fixed_count: None,
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Replay `results` one per prompt. Exhausting the script yields
    /// `Malformed` items.
    pub fn sequence(results: Vec<ItemResult>) -> Self {
        Self::with_script(Script::Sequence(Mutex::new(results.into())))
    }

    pub fn from_fn(f: impl Fn(&Prompt) -> ItemResult + Send + Sync + 'static) -> Self {
        Self::with_script(Script::Func(Box::new(f)))
    }

    /// Fail every batch with `error`.
    pub fn failing(error: InferenceError) -> Self {
        Self::with_script(Script::Fail(error))
    }

    /// Sleep this long inside every `generate` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return at most `n` results per batch regardless of its size.
    pub fn with_fixed_count(mut self, n: usize) -> Self {
        self.fixed_count = Some(n);
        self
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.batch_sizes().len()
    }

    /// Size of every batch received, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_item(&self, prompt: &Prompt) -> ItemResult {
        match &self.script {
            Script::Sequence(queue) => queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError::Malformed("script exhausted".into()))),
            Script::Func(f) => f(prompt),
            Script::Fail(e) => Err(e.clone()),
        }
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _model: &str,
        prompts: Vec<Prompt>,
    ) -> Result<Vec<ItemResult>, InferenceError> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompts.len());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Script::Fail(e) = &self.script {
            return Err(e.clone());
        }

        let mut results: Vec<ItemResult> = prompts.iter().map(|p| self.next_item(p)).collect();
        if let Some(n) = self.fixed_count {
            results.truncate(n);
        }
        Ok(results)
    }
}

/// A backend for offline demos: looks up the cluster named in the query,
/// then summarises the observation it gets back.
pub fn offline_operator() -> ScriptedBackend {
    ScriptedBackend::from_fn(|prompt| {
        let observed = prompt
            .messages
            .iter()
            .rev()
            .find(|m| m.role == opsloop_core::Role::Tool)
            .map(|m| m.content.clone());
        if let Some(observation) = observed {
            return Ok(Generation::answer(format!("Cluster report:\n{observation}")));
        }

        let query = prompt.last_user_text().unwrap_or_default().to_lowercase();
        let cluster = if query.contains("dev") {
            "dev"
        } else if query.contains("staging") {
            "staging"
        } else {
            "prod"
        };
        Ok(Generation::tool_call(
            "get_cluster_status",
            serde_json::json!({ "cluster_id": cluster }),
        ))
    })
}
