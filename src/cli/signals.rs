//! Signal handling for graceful shutdown

use flowmux::engine::Engine;
use tokio::task::JoinHandle;

/// Wait for SIGINT or SIGTERM; returns the signal name
///
/// If the handlers cannot be installed this never resolves.
#[cfg(unix)]
pub async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigint, mut sigterm) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Failed to install signal handlers");
                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn shutdown_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
        return std::future::pending().await;
    }
    "Ctrl+C"
}

/// Cancel `execution_id` on the first shutdown signal
///
/// Abort the returned handle once the execution has finished.
pub fn cancel_on_signal(engine: Engine, execution_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        eprintln!("\nReceived {}, cancelling...", signal);
        if let Err(e) = engine.cancel(&execution_id) {
            tracing::debug!(error = %e, "Execution already finished");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmux::executor::ExecutorRegistry;

    #[tokio::test]
    async fn test_handler_aborts_cleanly() {
        let engine = Engine::new(ExecutorRegistry::with_builtins());
        let handle = cancel_on_signal(engine, "exec".into());
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
