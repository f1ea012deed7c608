//! # Watch Mode
//!
//! Runs every reconciliation loop on a background supervisor task.
//!
//! The caller starts the loops, waits for readiness, then hands over a shutdown
//! future. The first loop that fails stops all others and its error becomes the
//! result of the run.

use crate::controller::error_policy::log_fatal_diagnostics;
use crate::controller::reconciler::{KindReconciler, LoopError};
use crate::runtime::signals::{readiness_tokens, ReadyFlag, StopFlag};
use crate::runtime::SidecarError;
use std::future::Future;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

#[derive(Debug)]
pub struct WatchHandle {
    ready: ReadyFlag,
    stop: StopFlag,
    supervisor: JoinHandle<Result<(), SidecarError>>,
}

struct LoopExit {
    target: String,
    kind: &'static str,
    namespace: Option<String>,
    result: Result<(), LoopError>,
}

impl WatchHandle {
    /// Spawn the loops. `ready` is set once all of them listed successfully.
    #[must_use]
    pub fn start(loops: Vec<KindReconciler>, ready: ReadyFlag, stop: StopFlag) -> Self {
        let tokens = readiness_tokens(&ready, loops.len());
        let mut set = JoinSet::new();

        for (reconciler, token) in loops.into_iter().zip(tokens) {
            let loop_stop = stop.clone();
            set.spawn(async move {
                let target = reconciler.target();
                let kind = reconciler.kind().as_str();
                let namespace = reconciler.namespace().map(str::to_string);
                let result = reconciler.run(loop_stop, token).await;
                LoopExit {
                    target,
                    kind,
                    namespace,
                    result,
                }
            });
        }

        let supervisor = tokio::spawn(supervise(set, stop.clone()));
        Self {
            ready,
            stop,
            supervisor,
        }
    }

    /// Wait until every loop completed its initial listing.
    ///
    /// Returns `false` when the loops stopped first (failure or shutdown).
    pub async fn wait_ready(&self) -> bool {
        tokio::select! {
            biased;
            () = self.ready.wait() => true,
            () = self.stop.wait() => false,
        }
    }

    /// Wait for readiness, then keep running until `shutdown` resolves or a loop fails.
    ///
    /// `shutdown` is honoured while the initial listing is still retrying too.
    pub async fn run<F>(self, shutdown: F) -> Result<(), SidecarError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interrupted = tokio::select! {
            ready = self.wait_ready() => {
                if ready {
                    info!("Initial synchronisation complete, watching for changes");
                }
                false
            }
            () = &mut shutdown => true,
        };
        if interrupted {
            info!("Shutdown requested before the initial listing completed");
            return self.stop().await;
        }
        self.run_until(shutdown).await
    }

    /// Keep running until `shutdown` resolves or a loop fails, then stop and join.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), SidecarError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = shutdown => info!("Stopping reconciliation loops"),
            () = self.stop.wait() => debug!("Reconciliation loops stopping"),
        }
        self.stop().await
    }

    /// Request stop and wait for every loop to finish
    pub async fn stop(self) -> Result<(), SidecarError> {
        self.stop.set();
        match self.supervisor.await {
            Ok(result) => result,
            Err(e) => Err(SidecarError::Aborted {
                target: "supervisor".to_string(),
                message: e.to_string(),
            }),
        }
    }
}

async fn supervise(mut set: JoinSet<LoopExit>, stop: StopFlag) -> Result<(), SidecarError> {
    let mut failure = None;

    while let Some(joined) = set.join_next().await {
        let outcome = match joined {
            Ok(LoopExit {
                result: Ok(()),
                target,
                ..
            }) => {
                debug!(target_scope = %target, "Reconciliation loop finished");
                continue;
            }
            Ok(LoopExit {
                target,
                kind,
                namespace,
                result: Err(source),
            }) => {
                log_fatal_diagnostics(source.api_error(), kind, namespace.as_deref());
                SidecarError::Loop { target, source }
            }
            Err(e) => SidecarError::Aborted {
                target: "unknown".to_string(),
                message: e.to_string(),
            },
        };

        if failure.is_none() {
            error!(error = %outcome, "Reconciliation loop failed, stopping all loops");
            stop.set();
            failure = Some(outcome);
        } else {
            error!(error = %outcome, "Additional reconciliation loop failure");
        }
    }

    failure.map_or(Ok(()), Err)
}
