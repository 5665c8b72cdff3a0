//! EventConnection - buffered subscriber connection
//!
//! The hub keeps only a `Weak` to each connection; the client-facing
//! [`EventConnectionHandle`] owns it. Delivery never blocks: events go into a
//! bounded queue with `try_send` and are dropped (and counted) when it is full.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use contracts::{ClientIdentity, ConnectionId, SensorEvent, SensorHandle};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::hub::HubShared;
use crate::lock;
use crate::metrics::{ConnectionMetrics, ConnectionMetricsSnapshot};

/// Subscription parameters of one handle on one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub sampling_period_ns: i64,
    pub max_report_latency_ns: i64,
    /// Hub-generated flush-complete markers still owed to this connection
    pub pending_flush_count: u32,
    /// Events are withheld until this connection's own flush completes
    pub first_flush_pending: bool,
}

#[derive(Debug, Default)]
struct ConnectionState {
    subscriptions: BTreeMap<SensorHandle, SubscriptionInfo>,
    wake_lock_ref_count: u32,
}

/// Per-batch routing facts computed by the dispatcher
pub(crate) struct DeliveryContext<'a> {
    /// For each event in the batch, the connection owning a flush-complete
    pub flush_owners: &'a [Option<ConnectionId>],
    pub wake_up: &'a HashSet<SensorHandle>,
    pub one_shot: &'a HashSet<SensorHandle>,
}

/// Outcome of delivering one batch to one connection
#[derive(Debug, Default)]
pub(crate) struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
    /// One-shot sensors that fired on this connection
    pub fired_one_shots: Vec<SensorHandle>,
}

enum Sent {
    Delivered,
    Dropped,
}

pub struct EventConnection {
    id: ConnectionId,
    identity: ClientIdentity,
    data_injection: bool,
    tx: mpsc::Sender<SensorEvent>,
    state: Mutex<ConnectionState>,
    metrics: ConnectionMetrics,
}

impl EventConnection {
    pub(crate) fn new(
        id: ConnectionId,
        identity: ClientIdentity,
        data_injection: bool,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<SensorEvent>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Arc::new(Self {
            id,
            identity,
            data_injection,
            tx,
            state: Mutex::new(ConnectionState::default()),
            metrics: ConnectionMetrics::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn package(&self) -> &str {
        &self.identity.package
    }

    /// Created for data injection
    pub fn is_data_injection(&self) -> bool {
        self.data_injection
    }

    pub fn metrics(&self) -> ConnectionMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The client dropped its receiving end
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Subscribe or update parameters. Returns `true` when newly added.
    pub(crate) fn add_sensor(&self, handle: SensorHandle, period_ns: i64, latency_ns: i64) -> bool {
        let mut state = lock(&self.state);
        match state.subscriptions.get_mut(&handle) {
            Some(info) => {
                info.sampling_period_ns = period_ns;
                info.max_report_latency_ns = latency_ns;
                false
            }
            None => {
                state.subscriptions.insert(
                    handle,
                    SubscriptionInfo {
                        sampling_period_ns: period_ns,
                        max_report_latency_ns: latency_ns,
                        pending_flush_count: 0,
                        first_flush_pending: false,
                    },
                );
                true
            }
        }
    }

    pub(crate) fn remove_sensor(&self, handle: SensorHandle) -> bool {
        lock(&self.state).subscriptions.remove(&handle).is_some()
    }

    pub fn has_sensor(&self, handle: SensorHandle) -> bool {
        lock(&self.state).subscriptions.contains_key(&handle)
    }

    pub fn has_any_sensor(&self) -> bool {
        !lock(&self.state).subscriptions.is_empty()
    }

    pub fn subscription(&self, handle: SensorHandle) -> Option<SubscriptionInfo> {
        lock(&self.state).subscriptions.get(&handle).copied()
    }

    pub fn active_handles(&self) -> Vec<SensorHandle> {
        lock(&self.state).subscriptions.keys().copied().collect()
    }

    pub fn subscriptions(&self) -> Vec<(SensorHandle, SubscriptionInfo)> {
        lock(&self.state)
            .subscriptions
            .iter()
            .map(|(h, i)| (*h, *i))
            .collect()
    }

    pub(crate) fn set_event_rate(&self, handle: SensorHandle, period_ns: i64) -> bool {
        match lock(&self.state).subscriptions.get_mut(&handle) {
            Some(info) => {
                info.sampling_period_ns = period_ns;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_first_flush_pending(&self, handle: SensorHandle, pending: bool) {
        if let Some(info) = lock(&self.state).subscriptions.get_mut(&handle) {
            info.first_flush_pending = pending;
        }
    }

    /// Owe one hub-generated flush-complete for `handle`
    pub(crate) fn increment_pending_flush(&self, handle: SensorHandle) -> bool {
        match lock(&self.state).subscriptions.get_mut(&handle) {
            Some(info) => {
                info.pending_flush_count += 1;
                true
            }
            None => false,
        }
    }

    /// Holds delivered wake-up events not yet acknowledged
    pub fn needs_wake_lock(&self) -> bool {
        lock(&self.state).wake_lock_ref_count > 0
    }

    pub fn wake_lock_ref_count(&self) -> u32 {
        lock(&self.state).wake_lock_ref_count
    }

    /// Returns the remaining unacknowledged count
    pub(crate) fn acknowledge(&self, count: u32) -> u32 {
        let mut state = lock(&self.state);
        state.wake_lock_ref_count = state.wake_lock_ref_count.saturating_sub(count);
        state.wake_lock_ref_count
    }

    pub(crate) fn reset_wake_lock_ref_count(&self) {
        lock(&self.state).wake_lock_ref_count = 0;
    }

    /// Route one batch to this connection.
    ///
    /// Flush-complete markers go only to their owner; the first one after a
    /// shared enable is swallowed and unblocks the handle. A one-shot sensor
    /// delivers at most one event per activation.
    pub(crate) fn send_events(&self, events: &[SensorEvent], ctx: &DeliveryContext<'_>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut state = lock(&self.state);

        for (idx, event) in events.iter().enumerate() {
            let Some(info) = state.subscriptions.get_mut(&event.sensor) else {
                continue;
            };

            if event.is_flush_complete() {
                if ctx.flush_owners.get(idx).copied().flatten() != Some(self.id) {
                    continue;
                }
                if info.first_flush_pending {
                    info.first_flush_pending = false;
                    debug!(connection = %self.id, handle = %event.sensor, "first flush complete");
                    continue;
                }
                if let Sent::Delivered = self.push(&mut state, event.clone(), false) {
                    self.metrics.inc_flushes_completed();
                    report.delivered += 1;
                } else {
                    report.dropped += 1;
                }
                continue;
            }

            if info.first_flush_pending {
                continue;
            }

            if ctx.one_shot.contains(&event.sensor) {
                if report.fired_one_shots.contains(&event.sensor) {
                    continue;
                }
                report.fired_one_shots.push(event.sensor);
            }

            let wake_up = ctx.wake_up.contains(&event.sensor);
            match self.push(&mut state, event.clone(), wake_up) {
                Sent::Delivered => report.delivered += 1,
                Sent::Dropped => report.dropped += 1,
            }
        }

        report.delivered += self.send_pending_flushes_locked(&mut state);
        report
    }

    /// Deliver a single event outside the batch path (cached on-change value)
    pub(crate) fn send_single(&self, event: SensorEvent, wake_up: bool) -> bool {
        let mut state = lock(&self.state);
        matches!(self.push(&mut state, event, wake_up), Sent::Delivered)
    }

    /// Emit owed hub-generated flush-complete markers
    pub(crate) fn send_pending_flushes(&self) -> usize {
        let mut state = lock(&self.state);
        self.send_pending_flushes_locked(&mut state)
    }

    fn send_pending_flushes_locked(&self, state: &mut ConnectionState) -> usize {
        let owed: Vec<(SensorHandle, u32)> = state
            .subscriptions
            .iter()
            .filter(|(_, info)| info.pending_flush_count > 0)
            .map(|(h, info)| (*h, info.pending_flush_count))
            .collect();

        let mut sent = 0;
        for (handle, count) in owed {
            for _ in 0..count {
                let marker = SensorEvent::flush_complete(handle, 0);
                if self.tx.try_send(marker).is_err() {
                    // retried on the next delivery
                    break;
                }
                if let Some(info) = state.subscriptions.get_mut(&handle) {
                    info.pending_flush_count -= 1;
                }
                self.metrics.inc_flushes_completed();
                self.metrics.inc_delivered();
                sent += 1;
            }
        }
        sent
    }

    fn push(&self, state: &mut ConnectionState, mut event: SensorEvent, wake_up: bool) -> Sent {
        event.wake_up_ack_required = wake_up;
        let handle = event.sensor;

        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics.inc_delivered();
                if wake_up {
                    state.wake_lock_ref_count += 1;
                    self.metrics.inc_wake_events();
                }
                trace!(connection = %self.id, handle = %handle, "event delivered");
                Sent::Delivered
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.inc_dropped();
                observability::metrics::record_events_dropped("queue_full", 1);
                warn!(connection = %self.id, handle = %handle, "queue full, event dropped");
                Sent::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.inc_dropped();
                observability::metrics::record_events_dropped("closed", 1);
                Sent::Dropped
            }
        }
    }
}

impl std::fmt::Debug for EventConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConnection")
            .field("id", &self.id)
            .field("package", &self.identity.package)
            .field("data_injection", &self.data_injection)
            .finish()
    }
}

/// Client side of an event connection.
///
/// Dropping it destroys the connection in the hub.
pub struct EventConnectionHandle {
    conn: Arc<EventConnection>,
    events: mpsc::Receiver<SensorEvent>,
    hub: Weak<HubShared>,
}

impl EventConnectionHandle {
    pub(crate) fn new(
        conn: Arc<EventConnection>,
        events: mpsc::Receiver<SensorEvent>,
        hub: Weak<HubShared>,
    ) -> Self {
        Self { conn, events, hub }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn connection(&self) -> &Arc<EventConnection> {
        &self.conn
    }

    /// Wait for the next event; `None` once the hub is gone
    pub async fn recv(&mut self) -> Option<SensorEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SensorEvent> {
        self.events.try_recv().ok()
    }

    /// Everything currently queued
    pub fn drain(&mut self) -> Vec<SensorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for EventConnectionHandle {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.destroy_event_connection(&self.conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SensorHandle = SensorHandle::new(1);
    const B: SensorHandle = SensorHandle::new(2);

    fn connection(capacity: usize) -> (Arc<EventConnection>, mpsc::Receiver<SensorEvent>) {
        EventConnection::new(
            ConnectionId::new(7),
            ClientIdentity::new(1000, 1, "com.example"),
            false,
            capacity,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<SensorEvent>) -> Vec<SensorEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[test]
    fn test_only_subscribed_handles_delivered() {
        let (conn, mut rx) = connection(16);
        conn.add_sensor(A, 0, 0);

        let events = vec![
            SensorEvent::data(A, 1, vec![1.0]),
            SensorEvent::data(B, 2, vec![2.0]),
        ];
        let none = HashSet::new();
        let ctx = DeliveryContext {
            flush_owners: &[None, None],
            wake_up: &none,
            one_shot: &none,
        };
        let report = conn.send_events(&events, &ctx);

        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx), vec![events[0].clone()]);
    }

    #[test]
    fn test_flush_complete_only_to_owner_and_first_swallowed() {
        let (conn, mut rx) = connection(16);
        conn.add_sensor(A, 0, 0);
        conn.set_first_flush_pending(A, true);

        let events = vec![
            SensorEvent::data(A, 1, vec![1.0]),
            SensorEvent::flush_complete(A, 2),
            SensorEvent::data(A, 3, vec![3.0]),
            SensorEvent::flush_complete(A, 4),
        ];
        let none = HashSet::new();
        let owners = [None, Some(conn.id()), None, Some(ConnectionId::new(99))];
        let ctx = DeliveryContext {
            flush_owners: &owners,
            wake_up: &none,
            one_shot: &none,
        };
        conn.send_events(&events, &ctx);

        // withheld before the first flush, swallowed marker, then data; foreign marker skipped
        assert_eq!(drain(&mut rx), vec![events[2].clone()]);
        assert!(!conn.subscription(A).unwrap().first_flush_pending);
    }

    #[test]
    fn test_wake_up_events_counted_until_acked() {
        let (conn, mut rx) = connection(16);
        conn.add_sensor(A, 0, 0);
        let wake: HashSet<_> = [A].into_iter().collect();
        let none = HashSet::new();
        let ctx = DeliveryContext {
            flush_owners: &[None, None],
            wake_up: &wake,
            one_shot: &none,
        };
        conn.send_events(
            &[SensorEvent::data(A, 1, vec![0.0]), SensorEvent::data(A, 2, vec![0.0])],
            &ctx,
        );

        assert!(drain(&mut rx).iter().all(|e| e.wake_up_ack_required));
        assert_eq!(conn.wake_lock_ref_count(), 2);
        assert_eq!(conn.acknowledge(1), 1);
        assert_eq!(conn.acknowledge(5), 0);
        assert!(!conn.needs_wake_lock());
    }

    #[test]
    fn test_one_shot_at_most_once_per_batch() {
        let (conn, mut rx) = connection(16);
        conn.add_sensor(A, 0, 0);
        let one_shot: HashSet<_> = [A].into_iter().collect();
        let none = HashSet::new();
        let ctx = DeliveryContext {
            flush_owners: &[None, None],
            wake_up: &none,
            one_shot: &one_shot,
        };
        let report = conn.send_events(
            &[SensorEvent::data(A, 1, vec![1.0]), SensorEvent::data(A, 2, vec![1.0])],
            &ctx,
        );

        assert_eq!(report.fired_one_shots, vec![A]);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_full_queue_drops_without_wake_count() {
        let (conn, _rx) = connection(1);
        conn.add_sensor(A, 0, 0);
        let wake: HashSet<_> = [A].into_iter().collect();
        let none = HashSet::new();
        let ctx = DeliveryContext {
            flush_owners: &[None, None],
            wake_up: &wake,
            one_shot: &none,
        };
        let report = conn.send_events(
            &[SensorEvent::data(A, 1, vec![0.0]), SensorEvent::data(A, 2, vec![0.0])],
            &ctx,
        );

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(conn.wake_lock_ref_count(), 1);
        assert_eq!(conn.metrics().dropped, 1);
    }

    #[test]
    fn test_trivial_flush_markers() {
        let (conn, mut rx) = connection(16);
        conn.add_sensor(A, 0, 0);
        assert!(conn.increment_pending_flush(A));
        assert!(conn.increment_pending_flush(A));
        assert!(!conn.increment_pending_flush(B));

        assert_eq!(conn.send_pending_flushes(), 2);
        let markers = drain(&mut rx);
        assert_eq!(markers.len(), 2);
        assert!(markers.iter().all(|e| e.is_flush_complete() && e.sensor == A));
        assert_eq!(conn.subscription(A).unwrap().pending_flush_count, 0);
    }
}
