use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Graceful shutdown requested (SIGTERM, SIGINT)
    Graceful,
    /// The shutdown channel went away without a signal
    Force,
}

/// Fans a single shutdown decision out to the accept loop and every
/// connection task.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Trigger shutdown. Only the first call has any effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(?reason, "Shutdown triggered");
            let _ = self.shutdown_tx.send(reason);
        }
    }

    /// Wait for SIGINT or SIGTERM and trigger a graceful shutdown.
    pub async fn run_signal_handler(&self) -> std::io::Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");
        let signal = wait_for_signal().await?;
        tracing::info!(signal, "Received shutdown signal, initiating graceful shutdown");
        self.trigger_shutdown(ShutdownReason::Graceful);
        Ok(())
    }

    /// Create a shutdown token that can be used to cancel operations
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.shutdown_tx.subscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "CTRL_C")
}

/// A token that can be used to check for shutdown signals
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl ShutdownToken {
    /// Check if shutdown has been initiated (non-blocking)
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Resolve once shutdown has been triggered, including when it was
    /// triggered before this token was created.
    pub async fn cancelled(&mut self) -> ShutdownReason {
        if self.is_shutdown_requested() {
            return ShutdownReason::Graceful;
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(broadcast::error::RecvError::Lagged(_)) => ShutdownReason::Graceful,
            Err(broadcast::error::RecvError::Closed) => ShutdownReason::Force,
        }
    }
}
