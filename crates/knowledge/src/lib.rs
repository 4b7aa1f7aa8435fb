//! Knowledge base for OpsLoop.
//!
//! Markdown runbooks are split into overlapping chunks and held in memory.
//! The store implements `opsloop_core::KnowledgeRetriever`, so the reasoning
//! loop and the `search_knowledge_base` tool share one instance.

pub mod chunker;
pub mod context;
pub mod loader;
pub mod store;

pub use chunker::chunk_document;
pub use context::format_context;
pub use loader::{KnowledgeDocument, load_directory};
pub use store::InMemoryKnowledgeBase;
