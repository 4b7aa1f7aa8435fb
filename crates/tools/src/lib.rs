//! Built-in operator tools for OpsLoop.
//!
//! - `get_cluster_status`: node health from the configured cluster inventory
//! - `search_knowledge_base`: runbook search over the shared knowledge base

pub mod cluster_status;
pub mod knowledge_search;

use std::sync::Arc;
use std::time::Duration;

use opsloop_config::ToolsConfig;
use opsloop_core::{KnowledgeRetriever, ToolRegistry};

pub use cluster_status::ClusterStatusTool;
pub use knowledge_search::KnowledgeSearchTool;

/// Create the default tool registry.
///
/// The knowledge search tool is only registered when a retriever is given.
pub fn default_registry(
    config: &ToolsConfig,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
) -> opsloop_core::Result<ToolRegistry> {
    let mut registry =
        ToolRegistry::new().with_default_timeout(Duration::from_secs(config.timeout_secs));
    registry.register(Arc::new(ClusterStatusTool::new(config.clusters.clone())))?;
    if let Some(retriever) = retriever {
        registry.register(Arc::new(KnowledgeSearchTool::new(retriever)))?;
    }
    Ok(registry)
}
