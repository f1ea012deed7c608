//! # Signals
//!
//! The two flags coordinating reconciliation loops with the orchestrator:
//!
//! - **ready**: set once every loop has finished its first list pass
//! - **stop**: set once to request a graceful shutdown, checked cooperatively
//!
//! A [`Flag`] is level-triggered. Tasks can poll it with [`Flag::is_set`] or
//! suspend on [`Flag::wait`], which returns immediately when already set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct Flag {
    tx: Arc<watch::Sender<bool>>,
}

pub type ReadyFlag = Flag;
pub type StopFlag = Flag;

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

impl Flag {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag. Returns `true` only for the call that flipped it.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|value| {
            if *value {
                false
            } else {
                *value = true;
                true
            }
        })
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting
        let _ = rx.wait_for(|value| *value).await;
    }
}

/// Readiness gate shared by a fixed number of loops.
///
/// Each loop holds one [`ReadyToken`]; the ready flag is set when the last
/// token reports.
#[must_use]
pub fn readiness_tokens(ready: &ReadyFlag, loops: usize) -> Vec<ReadyToken> {
    if loops == 0 {
        ready.set();
        return Vec::new();
    }
    let remaining = Arc::new(AtomicUsize::new(loops));
    (0..loops)
        .map(|_| ReadyToken {
            gate: Some((Arc::clone(&remaining), ready.clone())),
        })
        .collect()
}

#[derive(Debug)]
pub struct ReadyToken {
    gate: Option<(Arc<AtomicUsize>, ReadyFlag)>,
}

impl ReadyToken {
    /// Token that is not part of any gate
    #[must_use]
    pub fn detached() -> Self {
        Self { gate: None }
    }

    /// Report this loop as ready. Later calls are no-ops.
    pub fn report(&mut self) {
        let Some((remaining, ready)) = self.gate.take() else {
            return;
        };
        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 && ready.set() {
            info!("All reconciliation loops completed their initial listing");
        }
    }
}

/// Resolve on SIGTERM or SIGINT
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
