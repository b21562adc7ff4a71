//! OS signal handling.

/// Wait for shutdown signal (Ctrl+C).
///
/// If the handler cannot be installed this never returns, so the caller
/// keeps running until stopped some other way.
pub async fn wait_for_shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
