// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! `loomd`: the orchestration service's process entry point. Wires a
//! default [`Config`], the in-process backends, and an [`AppRoot`], then
//! runs until a shutdown signal arrives (spec.md §5).

use loom_backend::{CliBackend, DslBackend, DslParser};
use loom_core::{Config, SystemClock, ValidationReport};
use loom_runtime::{wait_for_shutdown_signal, AppRoot, Backends};
use loom_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Accepts any non-empty source; real grammars are deployment-specific and
/// pluggable through [`DslParser`].
struct PermissiveParser;

impl DslParser for PermissiveParser {
    fn parse(&self, source: &str) -> ValidationReport {
        if source.trim().is_empty() {
            ValidationReport::failed(vec![loom_core::Diagnostic::new("source must not be empty")])
        } else {
            ValidationReport::ok()
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::default();
    let store = Arc::new(MemoryStore::new());

    let cli_backend = CliBackend::new("claude", None, Duration::from_millis(500));
    let dsl_backend = DslBackend::new(
        Arc::new(PermissiveParser),
        config.dsl.default_duration_sec,
        config.dsl.min_duration_sec,
        config.dsl.max_duration_sec,
    );
    let backends = Backends(vec![Arc::new(cli_backend), Arc::new(dsl_backend)]);

    let app = AppRoot::new(config, store, backends, SystemClock);
    app.spawn_background_tasks();

    tracing::info!("loomd started");
    wait_for_shutdown_signal().await;

    tracing::info!("draining outstanding work");
    app.shutdown().await;
    tracing::info!("loomd stopped");
}
