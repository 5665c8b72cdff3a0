//! RuntimeEventLoop - delivery path for software-defined sensors
//!
//! Producers push into an unbounded queue and never block. The loop wakes on
//! a notification, takes at most one buffer worth of events and drops the rest.
//! Runtime sensors do not support device flushes, so no flush attribution
//! happens here.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use contracts::SensorEvent;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::hub::HubShared;
use crate::lock;

#[derive(Debug, Default)]
pub struct RuntimeQueue {
    events: Mutex<VecDeque<SensorEvent>>,
    ready: Notify,
}

impl RuntimeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: SensorEvent) {
        lock(&self.events).push_back(event);
        self.ready.notify_one();
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    /// Move up to `capacity` events into `out`, discarding the rest.
    ///
    /// Returns how many were discarded.
    pub fn drain_into(&self, out: &mut Vec<SensorEvent>, capacity: usize) -> usize {
        let mut events = lock(&self.events);
        let take = events.len().min(capacity);
        out.extend(events.drain(..take));
        let dropped = events.len();
        events.clear();
        dropped
    }

    fn wake(&self) {
        self.ready.notify_one();
    }
}

impl HubShared {
    pub(crate) fn dispatch_runtime(&self, events: &mut [SensorEvent]) -> usize {
        self.with_state(|state| {
            for event in events.iter_mut() {
                event.wake_up_ack_required = false;
            }
            state.recent.record(events);
            events.sort_by_key(|e| e.timestamp);

            let no_flush_owners = vec![None; events.len()];
            let delivered = self.route_batch(state, events, &no_flush_owners);
            self.record_gauges(state);
            delivered
        })
    }
}

/// Deliver whatever is queued right now. Returns the number of events taken.
pub(crate) fn drain_once(hub: &HubShared) -> usize {
    let mut buffer = Vec::new();
    drain_into(hub, &mut buffer)
}

fn drain_into(hub: &HubShared, buffer: &mut Vec<SensorEvent>) -> usize {
    buffer.clear();
    let capacity = hub.settings.runtime_queue_capacity;
    let dropped = hub.runtime_queue.drain_into(buffer, capacity);
    if dropped > 0 {
        warn!(dropped, capacity, "runtime event queue overflow");
        observability::metrics::record_runtime_events_dropped(dropped);
    }
    if buffer.is_empty() {
        return 0;
    }
    let count = buffer.len();
    hub.dispatch_runtime(buffer);
    count
}

pub(crate) async fn run_runtime_loop(hub: Arc<HubShared>, mut shutdown: watch::Receiver<bool>) {
    info!(capacity = hub.settings.runtime_queue_capacity, "runtime event loop started");
    let mut buffer = Vec::with_capacity(hub.settings.runtime_queue_capacity);

    loop {
        tokio::select! {
            _ = hub.runtime_queue.ready.notified() => {
                drain_into(&hub, &mut buffer);
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("runtime event loop stopped");
}

/// Unblock a loop waiting for events
pub(crate) fn interrupt(hub: &HubShared) {
    hub.runtime_queue.wake();
}
