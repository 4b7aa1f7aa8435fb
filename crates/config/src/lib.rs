//! Configuration loading, validation, and management for OpsLoop.
//!
//! Loads configuration from `~/.opsloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.opsloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model serving and batching
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Per-loop budgets and retry policy
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Global admission and caps
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Built-in tools
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Runbook knowledge base
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// ── Inference ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of an OpenAI-compatible endpoint (vLLM, Ollama, OpenAI)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,

    /// A batch closes once it holds this many requests
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// ...or once its oldest request has waited this long
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,

    /// Batches dispatched concurrently per model
    #[serde(default = "default_max_inflight_batches")]
    pub max_inflight_batches: usize,
}

fn default_base_url() -> String {
    "http://localhost:8001/v1".into()
}
fn default_model() -> String {
    "google/functiongemma-270m-it".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_new_tokens() -> u32 {
    128
}
fn default_max_batch_size() -> usize {
    8
}
fn default_max_wait_ms() -> u64 {
    25
}
fn default_backend_timeout_secs() -> u64 {
    60
}
fn default_max_inflight_batches() -> usize {
    1
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_new_tokens: default_max_new_tokens(),
            max_batch_size: default_max_batch_size(),
            max_wait_ms: default_max_wait_ms(),
            backend_timeout_secs: default_backend_timeout_secs(),
            max_inflight_batches: default_max_inflight_batches(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for InferenceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_new_tokens", &self.max_new_tokens)
            .field("max_batch_size", &self.max_batch_size)
            .field("max_wait_ms", &self.max_wait_ms)
            .field("backend_timeout_secs", &self.backend_timeout_secs)
            .field("max_inflight_batches", &self.max_inflight_batches)
            .finish()
    }
}

// ── Reasoning ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Maximum think phases per loop
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    #[serde(default = "default_max_consecutive_tool_failures")]
    pub max_consecutive_tool_failures: u32,

    /// Extra attempts after a failed inference
    #[serde(default = "default_inference_retries")]
    pub inference_retries: u32,

    #[serde(default)]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,

    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,

    /// Overrides the built-in operator prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

const MAX_INFERENCE_RETRIES: u32 = 10;
const MAX_RETRY_MULTIPLIER: f64 = 10.0;

fn default_max_steps() -> u32 {
    8
}
fn default_deadline_secs() -> u64 {
    120
}
fn default_max_consecutive_tool_failures() -> u32 {
    3
}
fn default_inference_retries() -> u32 {
    1
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_retrieval_top_k() -> usize {
    3
}
fn default_retrieval_timeout_ms() -> u64 {
    2000
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            deadline_secs: default_deadline_secs(),
            max_consecutive_tool_failures: default_max_consecutive_tool_failures(),
            inference_retries: default_inference_retries(),
            retry_base_delay_ms: 0,
            retry_multiplier: default_retry_multiplier(),
            retrieval_top_k: default_retrieval_top_k(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            system_prompt: None,
        }
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_max_concurrent_loops")]
    pub max_concurrent_loops: usize,

    /// Upper bound for caller-supplied `max_steps`
    #[serde(default = "default_max_steps_cap")]
    pub max_steps_cap: u32,

    /// Upper bound for caller-supplied deadlines
    #[serde(default = "default_max_deadline_secs")]
    pub max_deadline_secs: u64,

    /// Capacity of the trace channel; events beyond it are dropped
    #[serde(default = "default_trace_buffer")]
    pub trace_buffer: usize,
}

fn default_max_concurrent_loops() -> usize {
    16
}
fn default_max_steps_cap() -> u32 {
    32
}
fn default_max_deadline_secs() -> u64 {
    600
}
fn default_trace_buffer() -> usize {
    1024
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loops: default_max_concurrent_loops(),
            max_steps_cap: default_max_steps_cap(),
            max_deadline_secs: default_max_deadline_secs(),
            trace_buffer: default_trace_buffer(),
        }
    }
}

// ── Tools ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-invocation timeout
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,

    /// Static cluster inventory served by `get_cluster_status`
    #[serde(default = "default_clusters")]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: String,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub ready: bool,

    #[serde(default = "default_node_cpu")]
    pub cpu: String,

    #[serde(default = "default_node_memory")]
    pub memory: String,
}

fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_node_cpu() -> String {
    "4".into()
}
fn default_node_memory() -> String {
    "16Gi".into()
}

fn node(name: &str, ready: bool) -> NodeConfig {
    NodeConfig {
        name: name.into(),
        ready,
        cpu: default_node_cpu(),
        memory: default_node_memory(),
    }
}

fn default_clusters() -> Vec<ClusterConfig> {
    vec![
        ClusterConfig {
            id: "prod".into(),
            nodes: vec![
                node("prod-node-1", true),
                node("prod-node-2", true),
                node("prod-node-3", true),
            ],
        },
        ClusterConfig {
            id: "staging".into(),
            nodes: vec![node("staging-node-1", true), node("staging-node-2", false)],
        },
        ClusterConfig {
            id: "dev".into(),
            nodes: vec![node("dev-node-1", true)],
        },
    ]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            clusters: default_clusters(),
        }
    }
}

// ── Knowledge ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory of markdown runbooks; `None` starts with an empty base
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Rendered context is truncated to this many characters
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_max_context_length() -> usize {
    2000
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_context_length: default_max_context_length(),
        }
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_query_length() -> usize {
    10_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_query_length: default_max_query_length(),
        }
    }
}

// ── Logging ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.opsloop/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `OPSLOOP_API_KEY`
    /// - `OPSLOOP_MODEL`
    /// - `OPSLOOP_BASE_URL`
    /// - `OPSLOOP_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPSLOOP_API_KEY").filter(|k| !k.is_empty()) {
            self.inference.api_key = Some(key);
        }
        if let Some(model) = lookup("OPSLOOP_MODEL") {
            self.inference.model = model;
        }
        if let Some(url) = lookup("OPSLOOP_BASE_URL") {
            self.inference.base_url = url;
        }
        if let Some(level) = lookup("OPSLOOP_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".opsloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let inf = &self.inference;
        if inf.temperature < 0.0 || inf.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "inference.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if inf.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "inference.max_batch_size must be > 0".into(),
            ));
        }
        if inf.max_inflight_batches == 0 {
            return Err(ConfigError::ValidationError(
                "inference.max_inflight_batches must be > 0".into(),
            ));
        }
        if self.supervisor.max_concurrent_loops == 0 {
            return Err(ConfigError::ValidationError(
                "supervisor.max_concurrent_loops must be > 0".into(),
            ));
        }
        if self.supervisor.trace_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "supervisor.trace_buffer must be > 0".into(),
            ));
        }
        if self.reasoning.max_steps == 0 || self.reasoning.max_consecutive_tool_failures == 0 {
            return Err(ConfigError::ValidationError(
                "reasoning.max_steps and reasoning.max_consecutive_tool_failures must be > 0".into(),
            ));
        }
        if !(1.0..=MAX_RETRY_MULTIPLIER).contains(&self.reasoning.retry_multiplier) {
            return Err(ConfigError::ValidationError(format!(
                "reasoning.retry_multiplier must be between 1.0 and {MAX_RETRY_MULTIPLIER}"
            )));
        }
        if self.reasoning.inference_retries > MAX_INFERENCE_RETRIES {
            return Err(ConfigError::ValidationError(format!(
                "reasoning.inference_retries must be <= {MAX_INFERENCE_RETRIES}"
            )));
        }
        if self.knowledge.chunk_size == 0 || self.knowledge.chunk_overlap >= self.knowledge.chunk_size {
            return Err(ConfigError::ValidationError(
                "knowledge.chunk_overlap must be smaller than a non-zero knowledge.chunk_size".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.inference.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inference.max_batch_size, 8);
        assert_eq!(config.inference.max_inflight_batches, 1);
        assert_eq!(config.reasoning.inference_retries, 1);
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.tools.clusters.len(), 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.inference.model, config.inference.model);
        assert_eq!(parsed.tools.clusters, config.tools.clusters);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.inference.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut config = AppConfig::default();
        config.inference.max_batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn retry_schedule_is_bounded() {
        let mut config = AppConfig::default();
        config.reasoning.inference_retries = 80;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = AppConfig::default();
        config.reasoning.retry_multiplier = 1e6;
        assert!(config.validate().is_err());

        config.reasoning.retry_multiplier = f64::NAN;
        assert!(config.validate().is_err());

        config.reasoning.retry_multiplier = 10.0;
        config.reasoning.inference_retries = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let mut config = AppConfig::default();
        config.knowledge.chunk_overlap = config.knowledge.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.inference.model, "google/functiongemma-270m-it");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[inference]
model = "local-gemma"
max_batch_size = 4

[[tools.clusters]]
id = "edge"
nodes = [{{ name = "edge-1", ready = false }}]
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.inference.model, "local-gemma");
        assert_eq!(config.inference.max_batch_size, 4);
        assert_eq!(config.inference.max_wait_ms, 25);
        assert_eq!(config.tools.clusters.len(), 1);
        assert!(!config.tools.clusters[0].nodes[0].ready);
        assert_eq!(config.tools.clusters[0].nodes[0].memory, "16Gi");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[inference\nmodel = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            "OPSLOOP_API_KEY" => Some("sk-test".into()),
            "OPSLOOP_MODEL" => Some("other-model".into()),
            "OPSLOOP_LOG_LEVEL" => Some("debug".into()),
            _ => None,
        });
        assert!(config.has_api_key());
        assert_eq!(config.inference.model, "other-model");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.inference.base_url, default_base_url());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.inference.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("functiongemma"));
        assert!(toml_str.contains("max_batch_size"));
    }
}
