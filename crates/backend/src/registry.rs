// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Maps [`BackendKind`] to the backend instance that implements it.

use crate::AgentBackend;
use loom_core::BackendKind;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn AgentBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self { backends: HashMap::new() }
    }

    pub fn register(&mut self, backend: Arc<dyn AgentBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn AgentBackend>> {
        self.backends.get(&kind).cloned()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
