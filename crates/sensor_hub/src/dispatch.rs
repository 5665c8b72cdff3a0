//! DispatchLoop - polls the device and fans events out to connections
//!
//! One cycle: poll, handle wake-up events, cache, synthesize virtual events,
//! sort, attribute flush completions, apply hot-plug changes, deliver, clean up
//! one-shot sensors and finally release the wake lock if nobody needs it.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use contracts::{
    ConnectionId, DeviceError, SensorDescriptor, SensorEvent, SensorHandle, SensorType,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::connection::{DeliveryContext, EventConnection};
use crate::error::DispatchError;
use crate::hub::{HubShared, HubState};
use crate::sensor_list::SensorOrigin;

/// Index of the accuracy field patched into pre-1.0 rotation vectors
const ROTATION_VECTOR_ACCURACY: usize = 4;

impl HubShared {
    /// Poll buffer size, leaving room for one synthesized event per virtual sensor
    fn poll_budget(&self) -> usize {
        let virtual_count = crate::lock(&self.state).virtual_sensors.len();
        (self.settings.max_receive_events / (1 + virtual_count)).max(1)
    }

    /// Deliver a batch to every live connection.
    ///
    /// `flush_owners[i]` names the connection owning `events[i]` when it is a
    /// flush-complete marker. Returns the number of events delivered.
    pub(crate) fn route_batch(
        &self,
        state: &mut HubState,
        events: &[SensorEvent],
        flush_owners: &[Option<ConnectionId>],
    ) -> usize {
        let mut wake_up = HashSet::new();
        let mut one_shot = HashSet::new();
        for event in events {
            if let Some(sensor) = state.sensors.get(event.sensor) {
                if sensor.wake_up {
                    wake_up.insert(event.sensor);
                }
                if sensor.is_one_shot() {
                    one_shot.insert(event.sensor);
                }
            }
        }
        if !wake_up.is_empty() {
            self.wake_lock.acquire();
        }

        let ctx = DeliveryContext {
            flush_owners,
            wake_up: &wake_up,
            one_shot: &one_shot,
        };

        let snapshot = self.live_connections(state);
        let mut delivered = 0;
        let mut fired: Vec<(Arc<EventConnection>, SensorHandle)> = Vec::new();
        for conn in &snapshot.events {
            if !conn.has_any_sensor() {
                continue;
            }
            let report = conn.send_events(events, &ctx);
            delivered += report.delivered;
            for handle in report.fired_one_shots {
                fired.push((Arc::clone(conn), handle));
            }
        }

        // one-shot sensors disable themselves at the device
        for (conn, handle) in fired {
            conn.remove_sensor(handle);
            if state.active.unsubscribe(handle, conn.id()).deleted {
                state.device_enabled.remove(&handle);
                debug!(connection = %conn.id(), handle = %handle, "one-shot sensor auto-disabled");
            }
        }

        self.release_wake_lock_if_idle(state);
        observability::metrics::record_events_delivered(delivered);
        delivered
    }

    /// Feed physical events through active virtual sensors.
    ///
    /// Returns the number of synthesized events appended.
    fn synthesize(&self, state: &mut HubState, events: &mut Vec<SensorEvent>) -> usize {
        let active = state.active.virtual_handles();
        if active.is_empty() {
            return 0;
        }

        let capacity = self.settings.max_receive_events;
        let room = capacity.saturating_sub(events.len());
        let mut synthesized = Vec::new();

        for handle in active {
            let Some(vs) = state.virtual_sensors.get_mut(&handle) else {
                continue;
            };
            for event in events.iter() {
                vs.process(event, &mut synthesized);
            }
        }

        let dropped = synthesized.len().saturating_sub(room);
        if dropped > 0 {
            synthesized.truncate(room);
            warn!(dropped, capacity, "virtual sensor output exceeds buffer, dropping overflow");
            observability::metrics::record_events_dropped("virtual_overflow", dropped);
        }

        let count = synthesized.len();
        state.recent.record(&synthesized);
        events.extend(synthesized);
        observability::metrics::record_virtual_events(count);
        count
    }

    /// Historical clients expect an accuracy of -1 from pre-1.0 devices
    fn patch_rotation_vectors(&self, state: &HubState, events: &mut [SensorEvent]) {
        if !self.hal_version.needs_rotation_vector_patch() {
            return;
        }
        for event in events.iter_mut() {
            let is_rotation = state
                .sensors
                .get(event.sensor)
                .is_some_and(|s| s.sensor_type == SensorType::RotationVector);
            if !is_rotation {
                continue;
            }
            if let Some(values) = event.values_mut() {
                if values.len() <= ROTATION_VECTOR_ACCURACY {
                    values.resize(ROTATION_VECTOR_ACCURACY + 1, 0.0);
                }
                values[ROTATION_VECTOR_ACCURACY] = -1.0;
            }
        }
    }

    /// Register or remove hot-plugged sensors announced in the batch
    fn apply_dynamic_meta(&self, state: &mut HubState, events: &[SensorEvent]) {
        for event in events {
            let Some(meta) = event.dynamic_meta() else {
                continue;
            };
            if meta.connected {
                let Some(descriptor) = meta.descriptor.clone() else {
                    warn!(handle = %meta.handle, "dynamic connect without descriptor");
                    continue;
                };
                let descriptor = SensorDescriptor {
                    is_dynamic: true,
                    ..descriptor
                };
                let name = descriptor.name.clone();
                match state.sensors.add(descriptor, SensorOrigin::Dynamic) {
                    Ok(()) => info!(handle = %meta.handle, name = %name, "dynamic sensor connected"),
                    Err(e) => error!(handle = %meta.handle, error = %e, "dynamic sensor rejected"),
                }
            } else {
                if state.sensors.origin(meta.handle) != Some(SensorOrigin::Dynamic) {
                    warn!(handle = %meta.handle, "disconnect for unknown dynamic sensor");
                    continue;
                }
                self.force_unsubscribe_all(state, meta.handle);
                state.device_enabled.remove(&meta.handle);
                state.sensors.remove(meta.handle);
                info!(handle = %meta.handle, "dynamic sensor disconnected");
            }
        }
    }

    /// Everything after a successful poll, under the hub lock
    #[instrument(name = "dispatch_cycle", skip(self, events), fields(count = events.len()))]
    pub(crate) fn dispatch_polled(&self, events: &mut Vec<SensorEvent>) -> usize {
        if let Some(newest) = events.iter().map(|e| e.timestamp).max() {
            self.last_timestamp.fetch_max(newest, Ordering::Relaxed);
        }

        self.with_state(|state| {
            for event in events.iter_mut() {
                event.wake_up_ack_required = false;
            }

            let wake_count = events
                .iter()
                .filter(|e| state.sensors.is_wake_up(e.sensor))
                .count();
            if wake_count > 0 {
                self.wake_lock.acquire();
                self.device.write_wake_lock_handled(wake_count);
            }

            state.recent.record(events);

            self.synthesize(state, events);
            // stable: equal timestamps keep arrival order
            events.sort_by_key(|e| e.timestamp);

            self.patch_rotation_vectors(state, events);

            let flush_owners: Vec<Option<ConnectionId>> = events
                .iter()
                .map(|e| {
                    e.is_flush_complete()
                        .then(|| state.active.pop_pending_flush(e.sensor))
                        .flatten()
                })
                .collect();

            self.apply_dynamic_meta(state, events);

            let delivered = self.route_batch(state, events, &flush_owners);
            self.update_proximity(state);
            self.record_gauges(state);
            delivered
        })
    }

    /// Disconnect every dynamic sensor and let the device re-enumerate
    #[instrument(name = "dispatch_reconnect", skip(self))]
    pub(crate) fn handle_reconnect(&self) -> Result<(), DispatchError> {
        let timestamp = self.last_timestamp.load(Ordering::Relaxed);
        let meta = self.settings.dynamic_meta_sensor_handle;

        let handles = crate::lock(&self.state)
            .sensors
            .handles_with_origin(SensorOrigin::Dynamic);
        info!(dynamic = handles.len(), "device reconnecting, disconnecting dynamic sensors");

        if !handles.is_empty() {
            let mut events: Vec<SensorEvent> = handles
                .iter()
                .map(|h| SensorEvent::dynamic_disconnected(meta.unwrap_or_default(), timestamp, *h))
                .collect();
            match meta {
                Some(_) => {
                    self.dispatch_polled(&mut events);
                }
                None => self.with_state(|state| self.apply_dynamic_meta(state, &events)),
            }
        }

        match self.device.reconnect() {
            Ok(()) => {
                let released = self.with_state(|state| state.sensors.release_retired(SensorOrigin::Dynamic));
                info!(released, "device reconnected");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "device reconnect failed");
                Err(DispatchError::Fatal(e))
            }
        }
    }
}

/// Run one poll/dispatch cycle. Returns the number of polled events.
pub(crate) fn poll_once(hub: &HubShared) -> Result<usize, DispatchError> {
    let mut buffer = Vec::new();
    poll_into(hub, &mut buffer)
}

fn poll_into(hub: &HubShared, buffer: &mut Vec<SensorEvent>) -> Result<usize, DispatchError> {
    buffer.clear();
    let budget = hub.poll_budget();

    match hub.device.poll(buffer, budget) {
        Ok(0) => Ok(0),
        Ok(count) => {
            buffer.truncate(count);
            trace!(count, "polled events");
            observability::metrics::record_events_polled(count);
            hub.dispatch_polled(buffer);
            Ok(count)
        }
        Err(DeviceError::DeadObject) if hub.device.is_reconnecting() => {
            hub.handle_reconnect()?;
            Ok(0)
        }
        Err(e) => {
            error!(error = %e, "poll failed, stopping dispatch");
            Err(DispatchError::Fatal(e))
        }
    }
}

/// Blocking dispatch loop; runs until shutdown or a fatal poll error.
///
/// A cycle in progress when shutdown is requested is completed first.
pub(crate) fn run_dispatch_loop(
    hub: Arc<HubShared>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), DispatchError> {
    info!(budget = hub.poll_budget(), "dispatch loop started");
    let mut buffer = Vec::with_capacity(hub.settings.max_receive_events);
    let mut cycles: u64 = 0;

    while !*shutdown.borrow() {
        poll_into(&hub, &mut buffer)?;
        cycles += 1;
        if cycles.is_multiple_of(10_000) {
            debug!(cycles, "dispatch progress");
        }
    }

    info!(cycles, "dispatch loop stopped");
    Ok(())
}
