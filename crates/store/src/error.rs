// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

use loom_core::OrchestrationError;
use thiserror::Error;

/// Errors surfaced by the state store adapter (spec.md §4.1).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The key does not exist, or the caller's `user_id` does not match the
    /// record's owner (spec.md §4.1: "fail with NotFound when either the
    /// key is missing or the caller's userId does not match").
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient store failure. Callers retry up to 3 times with
    /// exponential backoff before surfacing this (spec.md §4.1, §7).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for OrchestrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => OrchestrationError::NotFound(key),
            StoreError::Unavailable(msg) => OrchestrationError::StoreUnavailable(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
