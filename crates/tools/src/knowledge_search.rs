//! Knowledge search tool: runbook lookup on demand.
//!
//! The reasoning loop already injects context before every think step; this
//! tool lets the model ask a sharper follow-up question of its own.

use std::sync::Arc;

use async_trait::async_trait;
use opsloop_core::{KnowledgeRetriever, Tool, ToolError, ToolOutput};

const MAX_TOP_K: u64 = 10;

pub struct KnowledgeSearchTool {
    retriever: Arc<dyn KnowledgeRetriever>,
}

impl KnowledgeSearchTool {
    pub fn new(retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the runbook knowledge base for procedures, policies and troubleshooting steps."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "What to look for"
                },
                "top_k": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_TOP_K,
                    "description": "Maximum number of results (default 3)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = arguments["query"].as_str().unwrap_or_default();
        let top_k = arguments["top_k"].as_u64().unwrap_or(3).min(MAX_TOP_K) as usize;

        let snippets = self
            .retriever
            .retrieve(query, top_k)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        let mut sources: Vec<&str> = snippets.iter().filter_map(|s| s.source.as_deref()).collect();
        sources.dedup();

        Ok(ToolOutput::json(serde_json::json!({
            "query": query,
            "found": snippets.len(),
            "results": snippets,
            "sources": sources,
        })))
    }
}
