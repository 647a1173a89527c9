// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Read-side shapes returned by [`crate::MetricsAggregator::snapshot`]
//! (spec.md §6.5 "Metrics snapshot").

use crate::sample::{MetricsSample, Scope};
use serde::{Deserialize, Serialize};

/// Running counters (spec.md §4.9 "per-scope running counters").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Gauges: currently running / currently queued, not cumulative.
    pub active: u64,
    pub queued: u64,
}

/// Moving duration aggregates over the sliding sample window (spec.md §4.9
/// "avg, min, max, p50, p95, p99 of durationMs").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DurationStats {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Scope-specific ratios (spec.md §4.9); `None` where a scope (`cli`,
/// `dsl`, `workflow`) doesn't produce that pattern's observations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScopeRatios {
    pub convergence_rate: Option<f64>,
    pub avg_rounds: Option<f64>,
    pub avg_iterations: Option<f64>,
    pub avg_consensus_score: Option<f64>,
    pub avg_quality_improvement: Option<f64>,
}

/// A full read of one scope's state (spec.md §6.5 `metrics(scope, {
/// periodSeconds, includeRecent }) -> Snapshot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub scope: Scope,
    pub counters: CounterSnapshot,
    pub duration: DurationStats,
    pub ratios: ScopeRatios,
    /// Present only when the caller set `includeRecent`.
    pub recent_samples: Option<Vec<MetricsSample>>,
}
