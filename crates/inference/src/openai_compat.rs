//! OpenAI-compatible inference backend.
//!
//! Works with vLLM, Ollama, OpenAI and any server exposing
//! `/chat/completions`. Such servers take one conversation per request, so a
//! batch is fanned out as concurrent requests inside a single `generate`
//! call; the server's own continuous batching does the rest.
//!
//! Native `tool_calls` become proposals directly. Plain content goes through
//! the [`function_call`](crate::function_call) text protocol, which is what
//! small function-calling models emit.

use async_trait::async_trait;
use opsloop_core::{
    Generation, InferenceBackend, InferenceError, ItemResult, Message, Prompt, Role,
    ToolDefinition, ToolProposal,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::function_call;

/// An OpenAI-compatible model server.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    /// A local vLLM server (convenience constructor).
    pub fn vllm(base_url: impl Into<String>) -> Self {
        Self::new("vllm", base_url, None, Duration::from_secs(60))
    }

    /// A local Ollama server (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            None,
            Duration::from_secs(60),
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(model: &str, prompt: &Prompt) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::to_api_messages(&prompt.messages),
            "temperature": prompt.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = prompt.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !prompt.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&prompt.tools));
        }
        body
    }

    /// One `/chat/completions` round trip.
    async fn complete_one(&self, model: &str, prompt: &Prompt) -> ItemResult {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(&Self::request_body(model, prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Network(format!("request timed out: {e}"))
                } else {
                    InferenceError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(InferenceError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(InferenceError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Backend returned error");
            return Err(InferenceError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            InferenceError::Malformed(format!("Failed to parse response: {e}"))
        })?;
        decode_response(api_response)
    }
}

/// Turn the first choice of a completion into a [`Generation`].
fn decode_response(api_response: ApiResponse) -> ItemResult {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::Malformed("No choices in response".into()))?;

    let content = choice.message.content.unwrap_or_default();
    let native_call = choice
        .message
        .tool_calls
        .and_then(|calls| calls.into_iter().next());

    match native_call {
        Some(call) => {
            let arguments = if call.function.arguments.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    InferenceError::Malformed(format!(
                        "tool call arguments for {} are not JSON: {e}",
                        call.function.name
                    ))
                })?
            };
            Ok(Generation::ToolCall {
                thought: content.trim().to_string(),
                proposal: ToolProposal {
                    name: call.function.name,
                    arguments,
                },
            })
        }
        None => function_call::parse_output(&content),
    }
}

#[async_trait]
impl InferenceBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        model: &str,
        prompts: Vec<Prompt>,
    ) -> Result<Vec<ItemResult>, InferenceError> {
        debug!(backend = %self.name, model, batch_size = prompts.len(), "Sending completion batch");
        let results =
            futures::future::join_all(prompts.iter().map(|p| self.complete_one(model, p))).await;
        Ok(results)
    }

    async fn health_check(&self) -> Result<bool, InferenceError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "default_call_type")]
    r#type: String,
    function: ApiFunction,
}

fn default_call_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}
