// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Per-user fixed-window rate limiting (spec.md §4.2).

use crate::store::StateStore;
use loom_core::UserId;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window resets.
    pub reset_at_ms: u64,
}

/// Fixed `window_sec` / `max` requests per user, implemented as
/// `INCR + EXPIRE` against the store (spec.md §4.2 literally).
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    window: Duration,
    max: u32,
    bucket: &'static str,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore>, window: Duration, max: u32, bucket: &'static str) -> Self {
        Self { store, window, max, bucket }
    }

    /// Record one request attempt for `user_id` and decide admission.
    ///
    /// Exhausted admission is the caller's cue to return
    /// `RateLimitExceeded { retry_after_sec }` (spec.md §4.2).
    pub async fn check(&self, user_id: &UserId, now_epoch_ms: u64) -> Admission {
        let window_start = now_epoch_ms / (self.window.as_millis() as u64).max(1);
        let key = format!("rate:{}:{}:{}", user_id, self.bucket, window_start);
        let count = self
            .store
            .counter_incr_with_ttl(&key, self.window)
            .await
            .unwrap_or(u64::MAX);
        let allowed = count <= self.max as u64;
        let remaining = (self.max as u64).saturating_sub(count) as u32;
        let window_ms = self.window.as_millis() as u64;
        let reset_at_ms = (window_start + 1) * window_ms.max(1);
        Admission { allowed, remaining, reset_at_ms }
    }
}

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod tests;
