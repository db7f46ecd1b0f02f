//! Request batcher settings

use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Controls how concurrent `/predict` requests are coalesced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Route `/predict` through the batcher
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Flush as soon as this many queries are queued
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Flush a partially filled batch after this long, in milliseconds
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    /// Give up on a queued request after this long, in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    32
}

fn default_max_latency_ms() -> u64 {
    2000
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_batch_size: default_max_batch_size(),
            max_latency_ms: default_max_latency_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl BatcherConfig {
    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Reject settings the batcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            bail!("max batch size must be a positive integer");
        }
        if self.max_latency_ms == 0 {
            bail!("max latency must be a positive number of milliseconds");
        }
        if self.idle_timeout_ms == 0 {
            bail!("idle timeout must be a positive number of milliseconds");
        }
        Ok(())
    }
}
