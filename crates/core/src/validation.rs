// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Backend input validation report (spec.md §4.3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), line: None, column: None }
    }

    pub fn at(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self { message: message.into(), line: Some(line), column: Some(column) }
    }
}

/// Result of `AgentBackend::validate` (spec.md §4.3).
///
/// A DSL source with `is_valid = false` never advances to rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self { is_valid: true, errors: Vec::new(), warnings: Vec::new() }
    }

    pub fn failed(errors: Vec<Diagnostic>) -> Self {
        Self { is_valid: false, errors, warnings: Vec::new() }
    }
}
