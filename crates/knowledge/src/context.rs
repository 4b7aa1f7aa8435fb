//! Rendering retrieved snippets into prompt context.

use opsloop_core::Snippet;

pub const NO_CONTEXT: &str = "No relevant information found in the knowledge base.";

const TRUNCATION_NOTICE: &str = "...\n[Content truncated]";

/// Render snippets as numbered sources, keeping the total snippet text
/// within `max_length` characters.
pub fn format_context(snippets: &[Snippet], max_length: usize) -> String {
    if snippets.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let mut parts = Vec::with_capacity(snippets.len());
    let mut used = 0usize;

    for (i, snippet) in snippets.iter().enumerate() {
        let len = snippet.text.chars().count();
        let truncated = used + len > max_length;
        let content = if truncated {
            // Leave room for the notice.
            let remaining = max_length.saturating_sub(used).saturating_sub(50);
            if remaining == 0 {
                break;
            }
            let kept: String = snippet.text.chars().take(remaining).collect();
            format!("{kept}{TRUNCATION_NOTICE}")
        } else {
            used += len;
            snippet.text.clone()
        };

        parts.push(format!(
            "[Source {}]: {content}\n(Relevance: {:.2}, Source: {})",
            i + 1,
            snippet.score,
            snippet.source.as_deref().unwrap_or("Unknown"),
        ));

        if truncated || used >= max_length {
            break;
        }
    }

    parts.join("\n\n")
}
