//! HubWorkers - lifecycle of the long-lived hub tasks

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, instrument};

use crate::dispatch::run_dispatch_loop;
use crate::error::DispatchError;
use crate::hub::HubShared;
use crate::runtime::{interrupt, run_runtime_loop};
use crate::wake_lock::run_watchdog;

/// Handles of the dispatch loop, runtime loop and wake lock watchdog
pub struct HubWorkers {
    hub: Arc<HubShared>,
    shutdown: watch::Sender<bool>,
    dispatch: JoinHandle<Result<(), DispatchError>>,
    runtime: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

fn worker_failure(worker: &'static str, e: JoinError) -> DispatchError {
    DispatchError::Worker {
        worker,
        message: e.to_string(),
    }
}

impl HubWorkers {
    pub(crate) fn spawn(hub: Arc<HubShared>) -> Self {
        let (shutdown, rx) = watch::channel(false);

        let dispatch = {
            let hub = Arc::clone(&hub);
            let rx = rx.clone();
            hub.runtime
                .clone()
                .spawn_blocking(move || run_dispatch_loop(hub, rx))
        };
        let runtime = hub.runtime.spawn(run_runtime_loop(Arc::clone(&hub), rx.clone()));
        let watchdog = hub.runtime.spawn(run_watchdog(Arc::clone(&hub), rx));

        info!("hub workers started");
        Self {
            hub,
            shutdown,
            dispatch,
            runtime,
            watchdog,
        }
    }

    /// The dispatch loop has exited (shutdown or fatal error)
    pub fn is_finished(&self) -> bool {
        self.dispatch.is_finished()
    }

    /// Run until `signal` resolves or the dispatch loop dies, then stop everything.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), DispatchError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = signal => self.shutdown().await,
            res = &mut self.dispatch => {
                let result = res.map_err(|e| worker_failure("dispatch", e)).and_then(|r| r);
                if let Err(e) = &result {
                    error!(error = %e, "dispatch loop terminated");
                }
                self.stop_auxiliary().await;
                result
            }
        }
    }

    /// Ask every worker to stop and wait for them.
    ///
    /// The dispatch loop finishes its current batch first.
    #[instrument(name = "hub_workers_shutdown", skip(self))]
    pub async fn shutdown(self) -> Result<(), DispatchError> {
        let _ = self.shutdown.send(true);
        self.hub.device.interrupt();

        let result = self
            .dispatch
            .await
            .map_err(|e| worker_failure("dispatch", e))
            .and_then(|r| r);

        let Self {
            hub,
            shutdown,
            runtime,
            watchdog,
            ..
        } = self;
        Self::join_auxiliary(&hub, &shutdown, runtime, watchdog).await;

        info!("hub workers stopped");
        result
    }

    async fn stop_auxiliary(self) {
        let Self {
            hub,
            shutdown,
            runtime,
            watchdog,
            ..
        } = self;
        Self::join_auxiliary(&hub, &shutdown, runtime, watchdog).await;
    }

    async fn join_auxiliary(
        hub: &HubShared,
        shutdown: &watch::Sender<bool>,
        runtime: JoinHandle<()>,
        watchdog: JoinHandle<()>,
    ) {
        let _ = shutdown.send(true);
        interrupt(hub);
        if let Err(e) = runtime.await {
            error!(error = %e, "runtime loop panicked");
        }
        if let Err(e) = watchdog.await {
            error!(error = %e, "wake lock watchdog panicked");
        }
    }
}
