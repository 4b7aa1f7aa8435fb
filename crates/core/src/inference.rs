//! The InferenceBackend trait, the abstraction over model serving.
//!
//! A backend receives a whole batch of prompts in one call and answers with
//! one result per prompt, in the same order. Each result is either a direct
//! answer or a structured tool-call proposal, so callers never have to guess
//! which one they got.
//!
//! Implementations: OpenAI-compatible endpoints (vLLM, Ollama, OpenAI), and
//! scripted backends in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::message::Message;

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// The payload of one inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Rendered messages (system, user, prior steps)
    pub messages: Vec<Message>,

    /// Tools the model may propose
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

impl Prompt {
    /// Build a prompt with default sampling settings.
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    /// Text of the last user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::User)
            .map(|m| m.content.as_str())
    }
}

/// A tool call proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProposal {
    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// What the model produced for one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Generation {
    /// A final answer for the user.
    Answer { text: String },

    /// A request to run a tool. `thought` is any free text emitted alongside.
    ToolCall { thought: String, proposal: ToolProposal },
}

impl Generation {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::Answer { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::ToolCall {
            thought: String::new(),
            proposal: ToolProposal {
                name: name.into(),
                arguments,
            },
        }
    }

    /// Render the generation as the raw text recorded in step history.
    pub fn raw_output(&self) -> String {
        match self {
            Self::Answer { text } => text.clone(),
            Self::ToolCall { thought, proposal } => {
                let call = format!("call:{}{}", proposal.name, proposal.arguments);
                if thought.is_empty() {
                    call
                } else {
                    format!("{thought}\n{call}")
                }
            }
        }
    }
}

/// Result for a single prompt inside a batch.
pub type ItemResult = std::result::Result<Generation, InferenceError>;

/// The core InferenceBackend trait.
///
/// The batcher calls `generate` exactly once per batch. Returning `Err` fails
/// every member of the batch; per-item failures must be reported explicitly
/// as `Err` entries in the returned vector, which must have one entry per
/// prompt.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// A human-readable name for this backend (e.g., "vllm", "openai").
    fn name(&self) -> &str;

    /// Run a batch of prompts against `model`.
    async fn generate(
        &self,
        model: &str,
        prompts: Vec<Prompt>,
    ) -> std::result::Result<Vec<ItemResult>, InferenceError>;

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, InferenceError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_defaults() {
        let prompt = Prompt::new(vec![Message::user("hi")], vec![]);
        assert!((prompt.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(prompt.last_user_text(), Some("hi"));
    }

    #[test]
    fn generation_is_self_describing() {
        let call = Generation::tool_call("get_cluster_status", serde_json::json!({"cluster_id": "prod"}));
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["kind"], "tool_call");
        assert_eq!(json["proposal"]["name"], "get_cluster_status");

        let answer = serde_json::to_value(Generation::answer("done")).unwrap();
        assert_eq!(answer["kind"], "answer");
    }

    #[test]
    fn raw_output_includes_thought_and_call() {
        let generation = Generation::ToolCall {
            thought: "need status".into(),
            proposal: ToolProposal {
                name: "get_cluster_status".into(),
                arguments: serde_json::json!({"cluster_id": "dev"}),
            },
        };
        let raw = generation.raw_output();
        assert!(raw.starts_with("need status"));
        assert!(raw.contains("call:get_cluster_status"));
        assert!(raw.contains("\"dev\""));
    }
}
