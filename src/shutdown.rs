use anyhow::Result;
use futures::future::join_all;
use futures::Future;
use std::{pin::Pin, time::Duration};
use tokio::task::JoinHandle;
use tokio::{signal::ctrl_c, sync::watch, time::timeout};
use tracing::{error, info};

// Type alias for the pinned Ctrl+C future for cleaner signatures
type CtrlCFuture = Pin<Box<dyn Future<Output = Result<(), std::io::Error>> + Send>>;

/// Sets up the shutdown signal handling.
///
/// Returns a tuple containing:
/// - `watch::Sender<()>`: Used to signal shutdown to tasks.
/// - `watch::Receiver<()>`: Can be cloned and passed to tasks to listen for the signal.
/// - `CtrlCFuture`: A pinned future that resolves when Ctrl+C is pressed.
pub fn setup_shutdown_signal() -> (watch::Sender<()>, watch::Receiver<()>, CtrlCFuture) {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let ctrl_c_fut = Box::pin(ctrl_c());
    (shutdown_tx, shutdown_rx, ctrl_c_fut)
}

/// Waits for the shutdown signal (Ctrl+C). Once signaled, it sends the
/// shutdown signal via the watch channel and waits for the accept loops
/// to drain within `shutdown_timeout`.
///
/// # Arguments
/// * `shutdown_tx` - The sender half of the watch channel. Used to signal shutdown.
/// * `ctrl_c_signal` - The future that resolves on Ctrl+C.
/// * `server_handles` - The JoinHandles of the spawned accept loops.
/// * `shutdown_timeout` - Duration to wait for the accept loops to shut down.
pub async fn await_shutdown(
    shutdown_tx: watch::Sender<()>,
    ctrl_c_signal: CtrlCFuture,
    server_handles: Vec<JoinHandle<Result<()>>>,
    shutdown_timeout: Duration,
) {
    // Wait for the Ctrl+C signal.
    info!("Server running. Press Ctrl+C to initiate graceful shutdown.");
    match ctrl_c_signal.await {
        Ok(()) => info!("Ctrl+C received. Initiating graceful shutdown..."),
        Err(e) => error!(
            "Failed listening for Ctrl+C: {}. Initiating shutdown anyway...",
            e
        ),
    }

    // --- Initiate and Wait for Graceful Shutdown ---
    info!("Signaling accept loops and connection tasks to shut down...");
    // Send the signal. Clones of the receiver in the accept loops and
    // connection tasks will see this.
    if let Err(e) = shutdown_tx.send(()) {
        error!("Failed to send shutdown signal: {}", e);
        // Proceed with shutdown anyway
    }
    drop(shutdown_tx);

    info!(
        "Waiting up to {:?} for accept loops to finish...",
        shutdown_timeout
    );

    match timeout(shutdown_timeout, join_all(server_handles)).await {
        Ok(results) => {
            for result in results {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Accept loop exited with error: {:?}", e),
                    Err(e) => error!("Accept loop task panicked: {:?}", e),
                }
            }
            info!("All accept loops finished within timeout.");
        }
        Err(_) => error!(
            "Shutdown timed out after {:?} waiting for accept loops to finish.",
            shutdown_timeout
        ),
    }

    // Connection tasks receive the shutdown signal via their cloned
    // `shutdown_rx` and are expected to terminate within the Hyper grace
    // period handled in `handle_connection`.
    info!("Shutdown process complete.");
}
