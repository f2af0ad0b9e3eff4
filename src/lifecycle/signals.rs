//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C)
//! - Describe the signal for the termination log
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - No graceful drain: the first interrupt stops the process

/// Resolves when the process receives an interrupt.
///
/// If the handler cannot be installed the watcher never fires; the proxy
/// keeps running and can still be stopped by a listener failure.
pub async fn interrupt() -> String {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            "interrupt".to_string()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending().await
        }
    }
}
