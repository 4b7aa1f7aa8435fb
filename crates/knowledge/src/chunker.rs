//! Overlapping document chunker.
//!
//! Chunks prefer to end on a sentence (`.`) or paragraph (`\n\n`) boundary,
//! as long as that keeps them at least half of `chunk_size` long. Lengths are
//! counted in characters, not bytes.

/// Split `content` into chunks of at most `chunk_size` characters, each
/// starting `overlap` characters before the previous one ended.
pub fn chunk_document(content: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    if chunk_size == 0 || chars.len() <= chunk_size {
        return vec![content.trim().to_string()];
    }

    let half = chunk_size / 2;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());

        if end < chars.len() {
            let window = &chars[start..end];
            if let Some(dot) = window.iter().rposition(|&c| c == '.').filter(|&i| i > half) {
                end = start + dot + 1;
            } else if let Some(para) = rfind_paragraph(window).filter(|&i| i > half) {
                end = start + para + 2;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= chars.len() {
            break;
        }
        // Always make progress, even with a large overlap.
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Index of the last `\n\n` in `window`.
fn rfind_paragraph(window: &[char]) -> Option<usize> {
    window.windows(2).rposition(|pair| pair == ['\n', '\n'])
}
