// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

use crate::sample::{MetricsSample, PatternObservation, Scope};
use crate::snapshot::{CounterSnapshot, DurationStats, ScopeRatios, Snapshot};
use loom_core::JobStatus;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

const DEFAULT_WINDOW: usize = 1000;

#[derive(Default)]
struct ScopeState {
    total: u64,
    successful: u64,
    failed: u64,
    timed_out: u64,
    cancelled: u64,
    active: u64,
    queued: u64,
    samples: VecDeque<MetricsSample>,
    patterns: VecDeque<PatternObservation>,
}

/// Per-scope rolling aggregator (spec.md §4.9, C9). Guarded by a single
/// `parking_lot::Mutex` per the codebase's "single mutex around a `HashMap`"
/// convention; reads clone the bucket under the lock and compute
/// percentiles/ratios afterward, so the lock is never held across anything
/// beyond a `VecDeque` clone ("copy-on-read").
pub struct MetricsAggregator {
    window: usize,
    scopes: Mutex<HashMap<Scope, ScopeState>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self { window: window.max(1), scopes: Mutex::new(HashMap::new()) }
    }

    /// Records one terminal job's sample, updating the running counters and
    /// the bounded duration window (spec.md §4.9 "Metrics (C9) observe
    /// terminal transitions").
    pub fn record_terminal(&self, scope: Scope, sample: MetricsSample) {
        let mut scopes = self.scopes.lock();
        let state = scopes.entry(scope).or_default();
        state.total += 1;
        match sample.status {
            JobStatus::Completed => state.successful += 1,
            JobStatus::Timeout => state.timed_out += 1,
            JobStatus::Cancelled => state.cancelled += 1,
            _ => state.failed += 1,
        }
        if state.samples.len() >= self.window {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);
    }

    /// Records a collaboration-pattern observation alongside a terminal
    /// sample (`self-critique`/`discussion` scopes only).
    pub fn record_pattern(&self, scope: Scope, observation: PatternObservation) {
        let mut scopes = self.scopes.lock();
        let state = scopes.entry(scope).or_default();
        if state.patterns.len() >= self.window {
            state.patterns.pop_front();
        }
        state.patterns.push_back(observation);
    }

    pub fn incr_active(&self, scope: Scope) {
        self.scopes.lock().entry(scope).or_default().active += 1;
    }

    pub fn decr_active(&self, scope: Scope) {
        if let Some(state) = self.scopes.lock().get_mut(&scope) {
            state.active = state.active.saturating_sub(1);
        }
    }

    pub fn incr_queued(&self, scope: Scope) {
        self.scopes.lock().entry(scope).or_default().queued += 1;
    }

    pub fn decr_queued(&self, scope: Scope) {
        if let Some(state) = self.scopes.lock().get_mut(&scope) {
            state.queued = state.queued.saturating_sub(1);
        }
    }

    /// Reads one scope's current state (spec.md §6.5 `metrics(scope, {
    /// periodSeconds, includeRecent }) -> Snapshot`). `period_seconds`, when
    /// given, restricts the duration/ratio computation to samples newer
    /// than `now_ms - period_seconds * 1000`; `include_recent` attaches the
    /// (period-filtered) raw samples to the snapshot.
    pub fn snapshot(&self, scope: Scope, period_seconds: Option<u64>, include_recent: bool, now_ms: u64) -> Snapshot {
        let (counters, samples, patterns) = {
            let mut scopes = self.scopes.lock();
            let state = scopes.entry(scope).or_default();
            (
                CounterSnapshot {
                    total: state.total,
                    successful: state.successful,
                    failed: state.failed,
                    timed_out: state.timed_out,
                    cancelled: state.cancelled,
                    active: state.active,
                    queued: state.queued,
                },
                state.samples.clone(),
                state.patterns.clone(),
            )
        };

        let cutoff_ms = period_seconds.map(|secs| now_ms.saturating_sub(secs * 1_000));
        let windowed: Vec<&MetricsSample> = samples
            .iter()
            .filter(|s| cutoff_ms.map(|cutoff| s.timestamp_ms >= cutoff).unwrap_or(true))
            .collect();

        let duration = duration_stats(&windowed);
        let ratios = scope_ratios(&patterns);

        Snapshot {
            scope,
            counters,
            duration,
            ratios,
            recent_samples: include_recent.then(|| windowed.into_iter().cloned().collect()),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_stats(samples: &[&MetricsSample]) -> DurationStats {
    if samples.is_empty() {
        return DurationStats::default();
    }
    let mut durations: Vec<u64> = samples.iter().map(|s| s.duration_ms).collect();
    durations.sort_unstable();

    let sum: u128 = durations.iter().map(|&d| d as u128).sum();
    let avg_ms = sum as f64 / durations.len() as f64;

    DurationStats {
        avg_ms,
        min_ms: durations[0],
        max_ms: durations[durations.len() - 1],
        p50_ms: percentile(&durations, 0.50),
        p95_ms: percentile(&durations, 0.95),
        p99_ms: percentile(&durations, 0.99),
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

fn scope_ratios(patterns: &[PatternObservation]) -> ScopeRatios {
    if patterns.is_empty() {
        return ScopeRatios::default();
    }
    let n = patterns.len() as f64;
    let convergence_rate = patterns.iter().filter(|p| p.converged).count() as f64 / n;
    let avg_rounds_or_iterations = patterns.iter().map(|p| p.rounds_or_iterations as f64).sum::<f64>() / n;

    let consensus_scores: Vec<f64> = patterns.iter().filter_map(|p| p.consensus_score).collect();
    let avg_consensus_score =
        (!consensus_scores.is_empty()).then(|| consensus_scores.iter().sum::<f64>() / consensus_scores.len() as f64);

    let improvements: Vec<f64> = patterns.iter().filter_map(|p| p.quality_improvement).collect();
    let avg_quality_improvement =
        (!improvements.is_empty()).then(|| improvements.iter().sum::<f64>() / improvements.len() as f64);

    ScopeRatios {
        convergence_rate: Some(convergence_rate),
        avg_rounds: avg_consensus_score.is_some().then_some(avg_rounds_or_iterations),
        avg_iterations: avg_quality_improvement.is_some().then_some(avg_rounds_or_iterations),
        avg_consensus_score,
        avg_quality_improvement,
    }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
