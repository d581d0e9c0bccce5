//! Signal handling for graceful cluster shutdown.
//!
//! This module provides cross-platform signal handling to allow the
//! cluster to shut down gracefully when receiving termination signals.

use tokio::signal;
use tracing::info;

/// Waits for a shutdown signal from the operating system.
///
/// Listens for termination signals (SIGINT, SIGTERM on Unix; Ctrl+C on
/// Windows) and returns when one is received.
///
/// # Platform Support
///
/// * **Unix platforms**: Handles SIGINT and SIGTERM signals
/// * **Windows**: Handles Ctrl+C signal
///
/// # Returns
///
/// `Ok(())` when a shutdown signal is received, or an error if signal
/// handler setup failed.
pub async fn wait_for_shutdown() -> Result<(), Box<dyn std::error::Error>> {
    wait_for_shutdown_silent().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(())
}

pub async fn wait_for_shutdown_silent() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    Ok(())
}
