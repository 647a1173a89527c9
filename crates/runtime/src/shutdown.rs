// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Waits for the process's shutdown signal so `main` can drain gracefully
//! (spec.md §5 "Shutdown").

/// Resolves once SIGTERM or SIGINT (Ctrl-C) arrives. Installing a signal
/// handler can only fail if the process is already out of file descriptors
/// or the platform doesn't support it; either way the process cannot run
/// meaningfully, so this logs and exits rather than propagating a `Result`
/// nobody could recover from.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::process::exit(1);
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGINT handler");
                std::process::exit(1);
            }
        };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, starting graceful shutdown"),
            _ = sigint.recv() => tracing::info!("received SIGINT, starting graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("failed to install Ctrl-C handler");
            std::process::exit(1);
        }
        tracing::info!("received ctrl-c, starting graceful shutdown");
    }
}
