//! Graceful shutdown controller for the hub.
//!
//! Listens for SIGINT/SIGTERM and broadcasts a shutdown signal to the
//! WebSocket server and background sweeps via a `tokio::sync::broadcast`
//! channel.

use tokio::signal;
use tokio::sync::broadcast;

/// Coordinates graceful shutdown across the hub's tasks.
///
/// Tasks call [`subscribe`](Self::subscribe) to get a receiver, then
/// `select!` on it alongside their main loop. When shutdown is triggered
/// (either by OS signal or programmatically), every receiver is notified.
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Get a receiver that will be notified on shutdown.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// A future that resolves once shutdown is triggered.
    pub fn signalled(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }

    /// Wait for SIGTERM, SIGINT or a programmatic shutdown, then notify
    /// every subscriber.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = signal::ctrl_c();
        let programmatic = self.signalled();

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!("failed to install SIGTERM handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
            _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
            _ = programmatic => { tracing::info!("shutdown requested"); }
        }

        self.shutdown();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
