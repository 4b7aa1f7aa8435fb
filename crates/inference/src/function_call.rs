//! Text protocol used by small function-calling models.
//!
//! The model marks a tool call inline:
//!
//! ```text
//! Checking production first.
//! <start_function_call>call:get_cluster_status{"cluster_id": "prod"}<end_function_call>
//! ```
//!
//! Anything before the start marker is kept as the thought. Output without
//! the marker is a direct answer. Argument blocks are often not quite JSON
//! (`{cluster_id: prod}`), so a failed parse gets one repair pass before the
//! output is rejected as malformed.

use std::sync::LazyLock;

use opsloop_core::{Generation, InferenceError, ToolProposal};
use regex::{Captures, Regex};

pub const START_MARKER: &str = "<start_function_call>";
pub const END_MARKER: &str = "<end_function_call>";

static CALL_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:call\s*:\s*)?([A-Za-z_][\w.\-]*)\s*").expect("valid regex"));

static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([{,]\s*)([A-Za-z_][\w\-]*)\s*:"#).expect("valid regex"));

static BARE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(:\s*)([A-Za-z_][\w\-./]*)(\s*[,}])"#).expect("valid regex"));

/// Decode raw model output into a [`Generation`].
pub fn parse_output(text: &str) -> Result<Generation, InferenceError> {
    let Some(start) = text.find(START_MARKER) else {
        return Ok(Generation::answer(text.trim()));
    };

    let thought = text[..start].trim().to_string();
    let rest = &text[start + START_MARKER.len()..];
    let segment = match rest.find(END_MARKER) {
        Some(end) => &rest[..end],
        None => rest,
    };

    let proposal = parse_call(segment)?;
    Ok(Generation::ToolCall { thought, proposal })
}

/// Parse `call:NAME{ARGS}` (the `call:` prefix and the argument block are optional).
pub fn parse_call(segment: &str) -> Result<ToolProposal, InferenceError> {
    let segment = segment.replace("<escape>", "");
    let header = CALL_HEADER
        .captures(&segment)
        .ok_or_else(|| InferenceError::Malformed(format!("no function name in call: {segment:?}")))?;
    let name = header[1].to_string();
    let args_text = segment[header[0].len()..].trim();

    let arguments = if args_text.is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        parse_arguments(args_text)?
    };

    if !arguments.is_object() {
        return Err(InferenceError::Malformed(format!(
            "arguments for {name} are not an object"
        )));
    }
    Ok(ToolProposal { name, arguments })
}

fn parse_arguments(text: &str) -> Result<serde_json::Value, InferenceError> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    let repaired = repair_json(text);
    tracing::debug!(original = text, repaired = %repaired, "Repairing function call arguments");
    serde_json::from_str(&repaired)
        .map_err(|e| InferenceError::Malformed(format!("unparseable arguments {text:?}: {e}")))
}

/// Best-effort fix-ups for near-JSON emitted by small models.
pub fn repair_json(text: &str) -> String {
    let keyed = BARE_KEY.replace_all(text, r#"$1"$2":"#);
    BARE_VALUE
        .replace_all(&keyed, |caps: &Captures| {
            let value = &caps[2];
            match value {
                "true" | "false" | "null" => caps[0].to_string(),
                _ => format!("{}\"{}\"{}", &caps[1], value, &caps[3]),
            }
        })
        .into_owned()
}

/// Render a proposal back into the text protocol.
pub fn render_call(proposal: &ToolProposal) -> String {
    format!(
        "{START_MARKER}call:{}{}{END_MARKER}",
        proposal.name, proposal.arguments
    )
}
