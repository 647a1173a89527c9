// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Enumerated configuration options (spec.md §6.4).
//!
//! This is a plain struct handed to the application root at construction
//! time, the way `oj-daemon::lifecycle::Config` is built by its caller —
//! no environment/file parsing is specified, so none is invented here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliBackendConfig {
    pub max_concurrent: usize,
    pub default_timeout_ms: u64,
    pub queue_max: usize,
    pub use_api_fallback: bool,
}

impl Default for CliBackendConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            default_timeout_ms: 300_000,
            queue_max: 100,
            use_api_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslBackendConfig {
    pub max_concurrent: usize,
    pub queue_max: usize,
    pub default_duration_sec: u32,
    pub min_duration_sec: u32,
    pub max_duration_sec: u32,
}

impl Default for DslBackendConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_max: 50,
            default_duration_sec: 30,
            min_duration_sec: 1,
            max_duration_sec: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_sec: u64,
    pub heavy_max: u32,
    pub workflow_max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { window_sec: 60, heavy_max: 10, workflow_max: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cli: CliBackendConfig,
    pub dsl: DslBackendConfig,
    pub rate: RateLimitConfig,
    pub buffer_per_job_max_bytes: usize,
    pub subscriber_outbound_queue_max: usize,
    pub shutdown_drain_timeout_ms: u64,
    pub retention_ttl_sec: u64,
    /// Grace period between `SIGTERM` and `SIGKILL` for CLI backend cancellation
    /// (spec.md §4.3, §4.4, §8 "within graceSec + 1s").
    pub cancel_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cli: CliBackendConfig::default(),
            dsl: DslBackendConfig::default(),
            rate: RateLimitConfig::default(),
            buffer_per_job_max_bytes: 8 * 1024 * 1024,
            subscriber_outbound_queue_max: 256,
            shutdown_drain_timeout_ms: 30_000,
            retention_ttl_sec: 86_400,
            cancel_grace_ms: 5_000,
        }
    }
}
