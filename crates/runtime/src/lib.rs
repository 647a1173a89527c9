// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! loom-runtime: the application root.
//!
//! Wires C1-C9 (store, rate limiter, backend registry, job manager,
//! scheduler, event bus, workflow engine, collaboration engines, metrics
//! aggregator) into one [`AppRoot`], the in-process analogue of
//! `oj-daemon::lifecycle::DaemonState` — minus the Unix socket listener,
//! since a concrete transport is an external collaborator (spec.md §1
//! Non-goals).

pub mod app;
pub mod shutdown;

pub use app::{AppRoot, Backends};
pub use shutdown::wait_for_shutdown_signal;
