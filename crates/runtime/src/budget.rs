//! Per-request budgets and loop-wide policies.

use std::time::Duration;

use opsloop_config::AppConfig;
use serde::{Deserialize, Serialize};

use crate::prompt::DEFAULT_SYSTEM_PROMPT;

/// How far a single loop may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Maximum number of think phases
    pub max_steps: u32,

    /// Wall-clock limit, measured from acceptance
    pub deadline: Duration,
}

impl Budget {
    pub fn new(max_steps: u32, deadline: Duration) -> Self {
        Self {
            max_steps,
            deadline,
        }
    }

    /// Clamp caller-supplied values to the configured caps. At least one
    /// think phase is always allowed.
    pub fn clamp(self, max_steps_cap: u32, max_deadline: Duration) -> Self {
        Self {
            max_steps: self.max_steps.clamp(1, max_steps_cap.max(1)),
            deadline: self.deadline.min(max_deadline),
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(8, Duration::from_secs(120))
    }
}

/// Retry schedule for failed think attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based). Saturates at
    /// `Duration::MAX`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() || retry == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(factor * self.base_delay.as_secs_f64()).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::ZERO,
            multiplier: 2.0,
        }
    }
}

/// Settings shared by every loop of one supervisor.
#[derive(Debug, Clone)]
pub struct LoopPolicy {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
    pub max_consecutive_tool_failures: u32,
    pub retry: RetryPolicy,
    pub retrieval_top_k: usize,
    pub retrieval_timeout: Duration,
    pub max_context_length: usize,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            model: "scripted".into(),
            temperature: 0.2,
            max_tokens: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_consecutive_tool_failures: 3,
            retry: RetryPolicy::default(),
            retrieval_top_k: 3,
            retrieval_timeout: Duration::from_secs(2),
            max_context_length: 2000,
        }
    }
}

impl From<&AppConfig> for LoopPolicy {
    fn from(config: &AppConfig) -> Self {
        let reasoning = &config.reasoning;
        Self {
            model: config.inference.model.clone(),
            temperature: config.inference.temperature,
            max_tokens: Some(config.inference.max_new_tokens),
            system_prompt: reasoning
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            max_consecutive_tool_failures: reasoning.max_consecutive_tool_failures.max(1),
            retry: RetryPolicy {
                max_retries: reasoning.inference_retries,
                base_delay: Duration::from_millis(reasoning.retry_base_delay_ms),
                multiplier: reasoning.retry_multiplier,
            },
            retrieval_top_k: reasoning.retrieval_top_k,
            retrieval_timeout: Duration::from_millis(reasoning.retrieval_timeout_ms),
            max_context_length: config.knowledge.max_context_length,
        }
    }
}
