//! Wiring a supervisor from configuration.

use std::sync::Arc;
use std::time::Duration;

use opsloop_config::AppConfig;
use opsloop_core::{InferenceBackend, KnowledgeRetriever};
use opsloop_inference::{BatcherConfig, InferenceBatcher, OpenAiCompatBackend};
use opsloop_knowledge::InMemoryKnowledgeBase;
use tracing::info;

use crate::budget::{Budget, LoopPolicy};
use crate::reasoning::LoopResources;
use crate::supervisor::LoopSupervisor;

/// The OpenAI-compatible backend described by `[inference]`.
pub fn backend_from_config(config: &AppConfig) -> Arc<dyn InferenceBackend> {
    Arc::new(OpenAiCompatBackend::new(
        "openai_compat",
        config.inference.base_url.clone(),
        config.inference.api_key.clone(),
        Duration::from_secs(config.inference.backend_timeout_secs),
    ))
}

/// Default budget from `[reasoning]`.
pub fn default_budget(config: &AppConfig) -> Budget {
    Budget::new(
        config.reasoning.max_steps,
        Duration::from_secs(config.reasoning.deadline_secs),
    )
}

/// Build a supervisor over the configured HTTP backend.
pub fn build_supervisor(config: &AppConfig) -> opsloop_core::Result<LoopSupervisor> {
    build_supervisor_with_backend(config, backend_from_config(config))
}

/// Build a supervisor over any backend: knowledge base, tools, batcher and
/// policy all come from `config`. Must be called inside a tokio runtime.
pub fn build_supervisor_with_backend(
    config: &AppConfig,
    backend: Arc<dyn InferenceBackend>,
) -> opsloop_core::Result<LoopSupervisor> {
    let retriever: Option<Arc<dyn KnowledgeRetriever>> = if config.knowledge.enabled {
        Some(Arc::new(InMemoryKnowledgeBase::from_config(&config.knowledge)?))
    } else {
        None
    };

    let tools = opsloop_tools::default_registry(&config.tools, retriever.clone())?;
    let batcher = InferenceBatcher::new(backend, BatcherConfig::from(&config.inference));
    info!(
        backend = batcher.backend_name(),
        model = %config.inference.model,
        tools = tools.len(),
        knowledge = retriever.is_some(),
        "Runtime assembled"
    );

    let mut resources = LoopResources::new(
        Arc::new(batcher),
        Arc::new(tools),
        Arc::new(LoopPolicy::from(config)),
    );
    if let Some(retriever) = retriever {
        resources = resources.with_retriever(retriever);
    }

    Ok(LoopSupervisor::new(
        resources,
        config.supervisor.clone(),
        default_budget(config),
    ))
}
