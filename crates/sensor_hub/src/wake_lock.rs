//! WakeLockCoordinator - aggregate wake lock plus its ack watchdog
//!
//! The lock is taken on the first wake-up batch and released once no
//! connection holds unacknowledged wake-up events. A watchdog force-releases
//! it when no acknowledgement arrives within the timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::hub::HubShared;

#[derive(Debug)]
pub struct WakeLockCoordinator {
    held: AtomicBool,
    activity: Notify,
    timeout: Duration,
}

impl WakeLockCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: AtomicBool::new(false),
            activity: Notify::new(),
            timeout,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns `true` when the lock was not held before
    pub fn acquire(&self) -> bool {
        let acquired = !self.held.swap(true, Ordering::AcqRel);
        if acquired {
            debug!("wake lock acquired");
            observability::metrics::record_wake_lock_held(true);
            self.activity.notify_one();
        }
        acquired
    }

    /// Returns `true` when the lock was held before
    pub fn release(&self) -> bool {
        let released = self.held.swap(false, Ordering::AcqRel);
        if released {
            debug!("wake lock released");
            observability::metrics::record_wake_lock_held(false);
        }
        released
    }

    /// An acknowledgement arrived; restarts the watchdog timer
    pub fn notify_activity(&self) {
        self.activity.notify_one();
    }
}

/// Watchdog loop. Waits without a deadline while the lock is free.
pub(crate) async fn run_watchdog(hub: Arc<HubShared>, mut shutdown: watch::Receiver<bool>) {
    let coordinator = &hub.wake_lock;
    info!(timeout_ms = coordinator.timeout.as_millis() as u64, "wake lock watchdog started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if coordinator.is_held() {
            tokio::select! {
                res = tokio::time::timeout(coordinator.timeout, coordinator.activity.notified()) => {
                    if res.is_err() && coordinator.is_held() {
                        warn!("no wake-up acknowledgement before timeout, forcing release");
                        hub.force_release_wake_lock();
                        observability::metrics::record_wake_lock_timeout();
                    }
                }
                _ = shutdown.changed() => break,
            }
        } else {
            tokio::select! {
                _ = coordinator.activity.notified() => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    debug!("wake lock watchdog stopped");
}
