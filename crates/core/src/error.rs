// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Wire-stable error taxonomy (spec.md §7).
//!
//! [`OrchestrationError`] is the error type threaded through every
//! component boundary. [`ErrorKind`] is its tag-only projection, suitable
//! for serializing onto the wire without leaking internal detail.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User-visible, wire-stable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationFailed,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimitExceeded,
    QueueFull,
    BackendUnavailable,
    ExecutionFailed,
    Crash,
    Timeout,
    Cancelled,
    InternalError,
}

crate::simple_display! {
    ErrorKind {
        ValidationFailed => "VALIDATION_FAILED",
        Unauthorized => "UNAUTHORIZED",
        Forbidden => "FORBIDDEN",
        NotFound => "NOT_FOUND",
        RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        QueueFull => "QUEUE_FULL",
        BackendUnavailable => "BACKEND_UNAVAILABLE",
        ExecutionFailed => "EXECUTION_FAILED",
        Crash => "CRASH",
        Timeout => "TIMEOUT",
        Cancelled => "CANCELLED",
        InternalError => "INTERNAL_ERROR",
    }
}

/// The error type returned by every public orchestration operation.
///
/// Post-admission errors (everything except [`Self::ValidationFailed`],
/// [`Self::Unauthorized`], [`Self::RateLimitExceeded`] and
/// [`Self::QueueFull`]) are also recorded as terminal job/workflow state
/// rather than only surfaced synchronously (see spec.md §7 propagation
/// policy).
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limit exceeded, retry after {retry_after_sec}s")]
    RateLimitExceeded { retry_after_sec: u64 },

    #[error("queue full")]
    QueueFull,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A subprocess terminated by a signal rather than exiting normally,
    /// outside of this backend's own cancel/timeout path (spec.md §4.4
    /// "signal deaths without cancel/timeout produce failed(errorKind=Crash)").
    #[error("process crashed: {0}")]
    Crash(String),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    /// The shared state store is transiently unreachable. Not itself a
    /// wire-stable kind — callers that exhaust retries should map this to
    /// [`ErrorKind::InternalError`] (see spec.md §4.1).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl OrchestrationError {
    /// Project onto the wire-stable [`ErrorKind`] tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::QueueFull => ErrorKind::QueueFull,
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Self::ExecutionFailed(_) => ErrorKind::ExecutionFailed,
            Self::Crash(_) => ErrorKind::Crash,
            Self::Timeout => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) | Self::StoreUnavailable(_) => ErrorKind::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
