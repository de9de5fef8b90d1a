//! Pool, timeout and retry configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection pool configuration
///
/// Fixed once a [`PooledHttpClient`](crate::PooledHttpClient) is created.
/// Every field is optional when deserializing; missing fields take the
/// documented default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum connections across all destinations
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Per-destination cap for the destination that seeds the pool
    #[serde(default = "default_max_route_pool_size")]
    pub max_route_pool_size: usize,

    /// Per-destination cap for every other destination
    /// (falls back to `max_route_pool_size`)
    #[serde(default)]
    pub default_route_pool_size: Option<usize>,

    /// TCP connect and pool-slot acquisition timeout, 0 = unbounded
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Response head and body read timeout, 0 = unbounded
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Idle connections older than this are evicted
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Period of the idle evictor, 0 disables it
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Automatic retries for idempotent requests
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Initial retry delay (exponential backoff), 0 = retry immediately
    #[serde(default)]
    pub retry_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            max_route_pool_size: default_max_route_pool_size(),
            default_route_pool_size: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            retry_times: default_retry_times(),
            retry_delay_ms: 0,
        }
    }
}

impl PoolConfig {
    /// Create a new pool config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Config sized by total, default per-route and seeded per-route caps
    pub fn with_pool_sizes(max_pool: usize, default_route: usize, seeded_route: usize) -> Self {
        Self {
            max_pool_size: max_pool,
            max_route_pool_size: seeded_route,
            default_route_pool_size: Some(default_route),
            ..Default::default()
        }
    }

    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn with_max_route_pool_size(mut self, size: usize) -> Self {
        self.max_route_pool_size = size;
        self
    }

    pub fn with_default_route_pool_size(mut self, size: usize) -> Self {
        self.default_route_pool_size = Some(size);
        self
    }

    pub fn with_connect_timeout_ms(mut self, millis: u64) -> Self {
        self.connect_timeout_ms = millis;
        self
    }

    pub fn with_socket_timeout_ms(mut self, millis: u64) -> Self {
        self.socket_timeout_ms = millis;
        self
    }

    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    pub fn with_monitor_interval_secs(mut self, secs: u64) -> Self {
        self.monitor_interval_secs = secs;
        self
    }

    /// Set retry count
    pub fn with_retry_times(mut self, times: u32) -> Self {
        self.retry_times = times;
        self
    }

    pub fn with_retry_delay_ms(mut self, millis: u64) -> Self {
        self.retry_delay_ms = millis;
        self
    }

    /// Cap applied to destinations other than the seeded one
    pub fn route_default(&self) -> usize {
        self.default_route_pool_size
            .unwrap_or(self.max_route_pool_size)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// Default value functions for serde
fn default_max_pool_size() -> usize {
    200
}

fn default_max_route_pool_size() -> usize {
    50
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_socket_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_monitor_interval_secs() -> u64 {
    5
}

fn default_retry_times() -> u32 {
    3
}
