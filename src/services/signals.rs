//! Waits for SIGTERM/SIGINT (or Ctrl-C on platforms without `signal::unix`)
//! and drives the registered services through a bounded graceful shutdown.

use super::ServiceManager;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

pub async fn handle_shutdown_signals(manager: ServiceManager, timeout: Duration) -> ExitCode {
    wait_for_signal().await;
    info!(timeout_secs = timeout.as_secs(), "shutdown signal received, draining services");
    manager.shutdown_and_wait(timeout).await;
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    info!("received Ctrl-C");
}
