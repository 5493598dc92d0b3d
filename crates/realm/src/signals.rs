//! Signal handling for graceful server shutdown.

use tokio::signal;
use tracing::{info, warn};

/// Resolves once the process is asked to stop.
///
/// # Platform Support
///
/// * **Unix platforms**: SIGINT and SIGTERM, falling back to Ctrl+C if the
///   handlers cannot be installed
/// * **Other platforms**: Ctrl+C
///
/// # Returns
///
/// Completes when a signal arrives. If no handler can be installed at all the
/// future never resolves and the server keeps running until killed.
///
/// # Examples
///
/// ```rust,ignore
/// use crate::signals::shutdown_signal;
///
/// let outcome = coordinator.run(standard_pipeline(), context, shutdown_signal());
/// ```
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers: {}", e);
            }
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
