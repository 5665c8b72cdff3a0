//! ProximityNotifier - ordered asynchronous proximity-active notifications
//!
//! Every state change spawns its own task. Task `n` waits until task `n - 1`
//! has signalled completion, so listeners observe changes in the order they
//! happened while the caller never waits on listener code.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use contracts::ProximityActiveListener;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::trace;

use crate::error::{HubError, HubResult};
use crate::lock;

/// Signals completion of one notification even if a listener panics
struct Completion {
    done: Arc<watch::Sender<u64>>,
    seq: u64,
}

impl Drop for Completion {
    fn drop(&mut self) {
        let next = self.seq + 1;
        self.done.send_modify(|d| *d = (*d).max(next));
    }
}

pub struct ProximityNotifier {
    runtime: Handle,
    listeners: Mutex<Vec<Arc<dyn ProximityActiveListener>>>,
    last_reported: Mutex<bool>,
    next_seq: AtomicU64,
    done: Arc<watch::Sender<u64>>,
}

impl ProximityNotifier {
    pub fn new(runtime: Handle) -> Self {
        let (done, _) = watch::channel(0);
        Self {
            runtime,
            listeners: Mutex::new(Vec::new()),
            last_reported: Mutex::new(false),
            next_seq: AtomicU64::new(0),
            done: Arc::new(done),
        }
    }

    /// Last state reported to listeners
    pub fn is_active(&self) -> bool {
        *lock(&self.last_reported)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Register a listener and tell it the current state
    pub fn add_listener(&self, listener: Arc<dyn ProximityActiveListener>) -> HubResult<()> {
        {
            let mut listeners = lock(&self.listeners);
            if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                return Err(HubError::already_exists("proximity listener"));
            }
            listeners.push(Arc::clone(&listener));
        }
        let active = self.is_active();
        self.schedule(vec![listener], active);
        Ok(())
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ProximityActiveListener>) -> HubResult<()> {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        if listeners.len() == before {
            return Err(HubError::not_found("proximity listener"));
        }
        Ok(())
    }

    /// Notify every listener if `active` differs from the last reported state
    pub fn update(&self, active: bool) -> bool {
        {
            let mut last = lock(&self.last_reported);
            if *last == active {
                return false;
            }
            *last = active;
        }
        let listeners = lock(&self.listeners).clone();
        self.schedule(listeners, active);
        true
    }

    fn schedule(&self, listeners: Vec<Arc<dyn ProximityActiveListener>>, active: bool) {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
        let mut ready = self.done.subscribe();
        let completion = Completion {
            done: Arc::clone(&self.done),
            seq,
        };

        self.runtime.spawn(async move {
            let _ = ready.wait_for(|done| *done >= seq).await;
            trace!(seq, active, listeners = listeners.len(), "proximity notification");
            for listener in &listeners {
                listener.on_proximity_active(active);
            }
            drop(completion);
        });
    }
}

impl std::fmt::Debug for ProximityNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityNotifier")
            .field("listeners", &self.listener_count())
            .field("active", &self.is_active())
            .finish()
    }
}
