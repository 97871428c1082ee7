//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::history::ENVIRONMENT_HISTORY_CAP;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub retry: RetrySettings,

    /// Maximum readings retained per environment record
    #[serde(default = "default_history_cap")]
    pub environment_history_cap: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            environment_history_cap: default_history_cap(),
        }
    }
}

/// Retry knobs for remote writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total invocations allowed, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    10_000
}
fn default_history_cap() -> usize {
    ENVIRONMENT_HISTORY_CAP
}
