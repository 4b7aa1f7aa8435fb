//! In-memory knowledge base with keyword relevance scoring.

use std::sync::Arc;

use async_trait::async_trait;
use opsloop_config::KnowledgeConfig;
use opsloop_core::{KnowledgeRetriever, RetrievalError, Snippet};
use tokio::sync::RwLock;

use crate::loader::{KnowledgeDocument, load_directory};

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "of", "to", "in", "on", "for", "and", "or", "what", "how",
    "my", "me", "with", "do", "does", "it", "be",
];

/// Chunked runbooks held in memory.
pub struct InMemoryKnowledgeBase {
    documents: Arc<RwLock<Vec<KnowledgeDocument>>>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_documents(documents: Vec<KnowledgeDocument>) -> Self {
        Self {
            documents: Arc::new(RwLock::new(documents)),
        }
    }

    /// Build from the `[knowledge]` section, loading its directory if set.
    pub fn from_config(config: &KnowledgeConfig) -> Result<Self, RetrievalError> {
        let documents = match &config.directory {
            Some(dir) => load_directory(dir, config.chunk_size, config.chunk_overlap)?,
            None => Vec::new(),
        };
        Ok(Self::with_documents(documents))
    }

    pub async fn add_documents(&self, documents: Vec<KnowledgeDocument>) {
        self.documents.write().await.extend(documents);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Rank documents against `query` and return the best `k`.
    pub async fn search(&self, query: &str, k: usize) -> Vec<Snippet> {
        let terms = query_terms(query);
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let documents = self.documents.read().await;
        let mut scored: Vec<(f32, &KnowledgeDocument)> = documents
            .iter()
            .filter_map(|doc| {
                let score = relevance(&terms, &doc.content);
                (score > 0.0).then_some((score, doc))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(score, doc)| Snippet::new(doc.content.clone(), score).with_source(doc.source.clone()))
            .collect()
    }
}

impl Default for InMemoryKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledgeBase {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        let snippets = self.search(query, k).await;
        tracing::debug!(hits = snippets.len(), k, "Knowledge base search");
        Ok(snippets)
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .map(str::to_lowercase)
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

/// Score in `0.0..=1.0`: mostly the share of query terms present, with a
/// small bonus for how often they occur.
fn relevance(terms: &[String], content: &str) -> f32 {
    let content = content.to_lowercase();
    let mut matched = 0usize;
    let mut occurrences = 0usize;
    for term in terms {
        let count = content.matches(term.as_str()).count();
        if count > 0 {
            matched += 1;
            occurrences += count;
        }
    }
    if matched == 0 {
        return 0.0;
    }
    let coverage = matched as f32 / terms.len() as f32;
    let density = (occurrences as f32 / (content.len() as f32 / 100.0).max(1.0)).min(1.0);
    0.8 * coverage + 0.2 * density
}
