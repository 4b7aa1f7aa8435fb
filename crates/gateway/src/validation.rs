//! Query validation applied before a request reaches the supervisor.

use thiserror::Error;

/// Longest run of one repeated character a query may contain.
const MAX_REPEAT_RUN: usize = 100;

/// Share of whitespace above which a query is rejected.
const MAX_WHITESPACE_RATIO: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryRejection {
    #[error("query must not be empty")]
    Empty,

    #[error("query is {length} characters long, the limit is {max}")]
    TooLong { length: usize, max: usize },

    #[error("query contains invalid control characters")]
    ControlCharacters,

    #[error("query contains suspicious repeating patterns")]
    RepeatedCharacters,

    #[error("query contains excessive whitespace")]
    ExcessiveWhitespace,
}

/// Check a query against the gateway's input rules.
pub fn validate_query(query: &str, max_length: usize) -> Result<(), QueryRejection> {
    if query.trim().is_empty() {
        return Err(QueryRejection::Empty);
    }

    let length = query.chars().count();
    if length > max_length {
        return Err(QueryRejection::TooLong {
            length,
            max: max_length,
        });
    }

    if query.contains(['\0', '\u{0b}', '\u{0c}']) {
        return Err(QueryRejection::ControlCharacters);
    }

    if longest_run(query) > MAX_REPEAT_RUN {
        return Err(QueryRejection::RepeatedCharacters);
    }

    let whitespace = query.chars().filter(|c| c.is_whitespace()).count();
    if whitespace as f64 > length as f64 * MAX_WHITESPACE_RATIO {
        return Err(QueryRejection::ExcessiveWhitespace);
    }

    Ok(())
}

fn longest_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;
    for c in text.chars() {
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}
