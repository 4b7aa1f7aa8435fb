//! Tool trait and registry: the abstraction over operator capabilities.
//!
//! Tools give the reasoning loop the ability to act: query cluster state,
//! search runbooks, and so on. The registry validates every invocation
//! against the tool's declared JSON Schema before dispatch and bounds each
//! execution with a timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, ToolError};
use crate::inference::ToolDefinition;

/// Successful output of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Human/model readable content
    pub content: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }

    /// Structured output; `content` is the pretty-printed JSON.
    pub fn json(data: serde_json::Value) -> Self {
        let content = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
        Self {
            content,
            data: Some(data),
        }
    }
}

/// The core Tool trait.
///
/// Each tool (cluster status, knowledge search, ...) implements this trait
/// and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_cluster_status").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-validated arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
    timeout: Duration,
}

/// A registry of available tools.
///
/// Read-only once built; share it behind an `Arc` between loops.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: Duration::from_secs(30),
        }
    }

    /// Set the timeout applied to tools registered without their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    ///
    /// Fails if the tool's parameter schema does not compile.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> crate::Result<()> {
        let timeout = self.default_timeout;
        self.register_with_timeout(tool, timeout)
    }

    /// Register a tool with a specific execution timeout.
    pub fn register_with_timeout(
        &mut self,
        tool: Arc<dyn Tool>,
        timeout: Duration,
    ) -> crate::Result<()> {
        let schema = tool.parameters_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| Error::Config {
            message: format!("invalid parameter schema for tool '{}': {e}", tool.name()),
        })?;
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, timeout_ms = timeout.as_millis() as u64, "Registered tool");
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                validator,
                timeout,
            },
        );
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.tool.as_ref())
    }

    /// Get all tool definitions (for sending to the model), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.tool.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Invoke a tool by name.
    ///
    /// Unknown names, schema mismatches, timeouts and runtime errors all come
    /// back as typed [`ToolError`]s; nothing here panics on bad input.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        // A model that emits `call:tool{}` or nothing at all means "no arguments".
        let arguments = if arguments.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            arguments
        };

        let errors: Vec<String> = entry
            .validator
            .iter_errors(&arguments)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        if !errors.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool_name: name.to_string(),
                reason: errors.join("; "),
            });
        }

        let start = Instant::now();
        let result = tokio::time::timeout(entry.timeout, entry.tool.execute(arguments)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(output)) => {
                tracing::debug!(tool = %name, elapsed_ms, "Tool succeeded");
                Ok(output)
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, elapsed_ms, error = %e, "Tool failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(tool = %name, elapsed_ms, "Tool timed out");
                Err(ToolError::Timeout {
                    tool_name: name.to_string(),
                    timeout_ms: entry.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
