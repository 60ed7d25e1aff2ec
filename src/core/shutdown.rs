//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] completes when the operator process is asked to exit;
//! [`Supervisor::shutdown_on_signal`](crate::Supervisor::shutdown_on_signal) then stops
//! every backend so none outlives it as an orphan.
//!
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT`. **Elsewhere:** Ctrl-C.

/// Waits for a termination signal. Each call installs its own listeners.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    tracing::debug!(signal = name, "termination signal received");
    Ok(())
}

/// Waits for a termination signal. Each call installs its own listeners.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
