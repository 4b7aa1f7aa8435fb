//! Markdown directory loader.

use std::path::Path;

use opsloop_core::RetrievalError;
use serde::Serialize;
use tracing::{info, warn};

use crate::chunker::chunk_document;

/// One chunk of a runbook, as stored in the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeDocument {
    /// `<file stem>_<chunk index>`
    pub id: String,
    pub content: String,
    pub source: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Load every `*.md` file directly under `dir`, chunked.
///
/// A missing directory yields no documents; an unreadable file is an error.
pub fn load_directory(
    dir: &Path,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<KnowledgeDocument>, RetrievalError> {
    if !dir.exists() {
        warn!(directory = %dir.display(), "Knowledge directory does not exist");
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        RetrievalError::Unavailable(format!("cannot read {}: {e}", dir.display()))
    })?;
    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let mut documents = Vec::new();
    for path in &paths {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::Unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let chunks = chunk_document(&content, chunk_size, overlap);
        let total = chunks.len();
        documents.extend(chunks.into_iter().enumerate().map(|(i, chunk)| KnowledgeDocument {
            id: format!("{stem}_{i}"),
            content: chunk,
            source: path.display().to_string(),
            chunk_index: i,
            total_chunks: total,
        }));
    }

    info!(
        directory = %dir.display(),
        files = paths.len(),
        chunks = documents.len(),
        "Loaded knowledge documents"
    );
    Ok(documents)
}
