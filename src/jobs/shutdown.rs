//! Signal-driven shutdown flag for the collection daemon.
//!
//! The flag is only checked between cycles and between sleep slices, so a
//! cycle already in flight always runs to completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    running: Arc<AtomicBool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Spawn a task that triggers the flag on SIGINT (Ctrl-C) or SIGTERM
    pub fn listen(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("Received shutdown signal, stopping after the current step");
            signal.trigger();
        });
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        // Stay pending; a failed handler must not look like a signal
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_shared_between_clones() {
        let signal = ShutdownSignal::new();
        let other = signal.clone();
        assert!(signal.is_running());

        other.trigger();

        assert!(!signal.is_running());
        assert!(!other.is_running());
    }
}
