//! Subcommand implementations.

pub mod ask;
pub mod config_cmd;
pub mod serve;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use opsloop_config::{AppConfig, ConfigError};
use opsloop_core::InferenceBackend;
use opsloop_inference::scripted::offline_operator;
use opsloop_runtime::bootstrap::backend_from_config;

pub fn default_config_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Load `path` (defaults if missing) with environment overrides applied.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    AppConfig::load_with_env(path)
}

/// The configured model endpoint, or the scripted operator when `offline`.
pub fn backend(config: &AppConfig, offline: bool) -> Arc<dyn InferenceBackend> {
    if offline {
        Arc::new(offline_operator())
    } else {
        backend_from_config(config)
    }
}
