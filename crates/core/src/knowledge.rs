//! The KnowledgeRetriever trait for best-effort context lookup.
//!
//! Retrieval is advisory: the reasoning loop carries on without context when
//! a retriever fails, so implementations should report errors rather than
//! retry internally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// One piece of retrieved context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    /// The snippet text
    pub text: String,

    /// Relevance score (higher is better)
    pub score: f32,

    /// Where the snippet came from (file name, document id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Snippet {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Return up to `k` snippets for `query`, best first.
    ///
    /// No match is `Ok(vec![])`, not an error.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Snippet>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_builder() {
        let s = Snippet::new("restart the pod", 0.5).with_source("runbook.md");
        assert_eq!(s.source.as_deref(), Some("runbook.md"));
        let json = serde_json::to_value(Snippet::new("x", 1.0)).unwrap();
        assert!(json.get("source").is_none());
    }
}
