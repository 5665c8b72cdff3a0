//! SensorHub - client-facing facade over the shared hub state
//!
//! All routing tables live in one [`HubState`] behind a single mutex. Client
//! operations and both dispatch paths take that lock, so activation changes
//! are atomic with respect to delivery. Runtime sensor callbacks are queued
//! while the lock is held and invoked after it is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use contracts::{
    AccessOperation, AccessOracle, AllowAll, ClientIdentity, ConnectionId, Device, DeviceError,
    DirectChannelDescriptor, DirectFormat, DirectMemoryType, HalVersion, HubConfig, HubSettings,
    OperatingMode, ProximityActiveListener, RateLevel, ReportingMode, RuntimeSensorCallback,
    SensorDescriptor, SensorEvent, SensorHandle, SensorType, VirtualSensor, VirtualSensorConfig,
    DEFAULT_DEVICE_ID,
};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use crate::active::ActiveSensorTable;
use crate::connection::{
    ConnectionRegistry, ConnectionSnapshot, DirectConnection, DirectConnectionHandle,
    EventConnection, EventConnectionHandle, SubscriptionInfo,
};
use crate::error::{HubError, HubResult, Status};
use crate::history::{RegistrationHistory, RegistrationRecord};
use crate::lock;
use crate::metrics::ConnectionMetricsSnapshot;
use crate::mode::{ModeController, ModeTransition};
use crate::proximity::ProximityNotifier;
use crate::recent::RecentEventCache;
use crate::runtime::RuntimeQueue;
use crate::sensor_list::{SensorOrigin, SensorRegistry};
use crate::virtual_sensor::build_virtual_sensor;
use crate::wake_lock::WakeLockCoordinator;
use crate::workers::HubWorkers;

/// Sampling period and batch latency last sent for one handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchParams {
    pub period_ns: i64,
    pub latency_ns: i64,
}

impl BatchParams {
    fn merge(self, other: BatchParams) -> BatchParams {
        BatchParams {
            period_ns: self.period_ns.min(other.period_ns),
            latency_ns: self.latency_ns.min(other.latency_ns),
        }
    }
}

/// Activation change for a runtime sensor, delivered after the lock is released
pub(crate) struct RuntimeNotice {
    callback: Arc<dyn RuntimeSensorCallback>,
    handle: SensorHandle,
    enabled: bool,
    params: BatchParams,
}

/// Everything guarded by the hub lock
pub(crate) struct HubState {
    pub sensors: SensorRegistry,
    pub connections: ConnectionRegistry,
    pub active: ActiveSensorTable,
    pub recent: RecentEventCache,
    pub mode: ModeController,
    pub virtual_sensors: HashMap<SensorHandle, Box<dyn VirtualSensor>>,
    pub runtime_callbacks: HashMap<i32, Arc<dyn RuntimeSensorCallback>>,
    /// Handles enabled at the device (or runtime callback) and their batch parameters
    pub device_enabled: HashMap<SensorHandle, BatchParams>,
    /// Subscriptions switched off by a mode change; they stay off at the
    /// device until re-enabled or the hub returns to normal
    pub parked: HashSet<SensorHandle>,
    pub history: RegistrationHistory,
    pub deferred: Vec<RuntimeNotice>,
}

pub struct HubShared {
    pub(crate) settings: HubSettings,
    pub(crate) device: Arc<dyn Device>,
    oracle: Arc<dyn AccessOracle>,
    pub(crate) state: Mutex<HubState>,
    pub(crate) wake_lock: WakeLockCoordinator,
    pub(crate) runtime_queue: RuntimeQueue,
    pub(crate) proximity: ProximityNotifier,
    pub(crate) runtime: Handle,
    pub(crate) hal_version: HalVersion,
    /// Newest timestamp seen by the dispatch loop
    pub(crate) last_timestamp: AtomicI64,
    next_connection_id: AtomicU64,
}

impl HubShared {
    /// Run `f` under the hub lock, then deliver queued runtime callbacks
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut HubState) -> R) -> R {
        let (result, deferred) = {
            let mut state = lock(&self.state);
            let result = f(&mut state);
            (result, std::mem::take(&mut state.deferred))
        };
        for notice in deferred {
            notice.callback.on_configuration_changed(
                notice.handle,
                notice.enabled,
                notice.params.period_ns,
                notice.params.latency_ns,
            );
        }
        result
    }

    /// Live connections; entries whose owner vanished are cleaned up
    pub(crate) fn live_connections(&self, state: &mut HubState) -> ConnectionSnapshot {
        let snapshot = state.connections.snapshot();
        for id in &snapshot.dead {
            let handles: Vec<SensorHandle> = state
                .active
                .handles()
                .filter(|h| state.active.is_subscribed(*h, *id))
                .collect();
            state.active.remove_connection(*id);
            for handle in handles {
                self.sync_logged(state, handle);
            }
        }
        snapshot
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    // ---- device reconciliation ----

    /// Aggregated parameters every eligible subscriber of `handle` asks for
    fn subscriber_params(&self, state: &HubState, handle: SensorHandle) -> Option<BatchParams> {
        let record = state.active.get(handle)?;
        let mode = state.mode.mode();
        record
            .connections()
            .iter()
            .filter_map(|id| state.connections.event(*id))
            .filter(|conn| !mode.suspends_hardware() || state.mode.is_allow_listed(conn.package()))
            .filter_map(|conn| conn.subscription(handle))
            .map(|info| BatchParams {
                period_ns: info.sampling_period_ns,
                latency_ns: info.max_report_latency_ns,
            })
            .reduce(BatchParams::merge)
    }

    /// What `handle` should be running at, counting virtual sensors fed by it
    fn demand(&self, state: &HubState, handle: SensorHandle, origin: SensorOrigin) -> Option<BatchParams> {
        if origin.is_device_backed() && state.mode.mode() == OperatingMode::HalBypassReplayDataInjection {
            return None;
        }
        let direct = if state.parked.contains(&handle) {
            None
        } else {
            self.subscriber_params(state, handle)
        };
        let via_virtual = state
            .virtual_sensors
            .iter()
            .filter(|(vh, vs)| {
                vs.sources().contains(&handle) && state.active.is_active(**vh) && !state.parked.contains(*vh)
            })
            .filter_map(|(vh, _)| self.subscriber_params(state, *vh))
            .reduce(BatchParams::merge);

        match (direct, via_virtual) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (a, b) => a.or(b),
        }
    }

    /// Bring the device (or runtime callback) in line with the subscriptions of `handle`
    pub(crate) fn sync_device(&self, state: &mut HubState, handle: SensorHandle) -> Result<(), DeviceError> {
        let Some(entry) = state.sensors.entry(handle) else {
            // sensor vanished; the device already forgot it
            state.device_enabled.remove(&handle);
            return Ok(());
        };
        let origin = entry.origin;
        let device_id = entry.descriptor.device_id;
        if matches!(origin, SensorOrigin::Virtual | SensorOrigin::DynamicMeta) {
            return Ok(());
        }

        let wanted = self.demand(state, handle, origin);
        let current = state.device_enabled.get(&handle).copied();

        if origin == SensorOrigin::Runtime {
            let Some(callback) = state.runtime_callbacks.get(&device_id).cloned() else {
                return Ok(());
            };
            match (wanted, current) {
                (Some(w), Some(c)) if w == c => {}
                (Some(w), _) => {
                    state.device_enabled.insert(handle, w);
                    state.deferred.push(RuntimeNotice { callback, handle, enabled: true, params: w });
                }
                (None, Some(c)) => {
                    state.device_enabled.remove(&handle);
                    state.deferred.push(RuntimeNotice { callback, handle, enabled: false, params: c });
                }
                (None, None) => {}
            }
            return Ok(());
        }

        match (wanted, current) {
            (Some(w), Some(c)) if w == c => Ok(()),
            (Some(w), Some(_)) => {
                self.device.batch(handle, w.period_ns, w.latency_ns)?;
                state.device_enabled.insert(handle, w);
                Ok(())
            }
            (Some(w), None) => {
                self.device.batch(handle, w.period_ns, w.latency_ns)?;
                self.device.enable(handle)?;
                debug!(handle = %handle, period_ns = w.period_ns, "sensor enabled at device");
                state.device_enabled.insert(handle, w);
                Ok(())
            }
            (None, Some(_)) => {
                state.device_enabled.remove(&handle);
                debug!(handle = %handle, "sensor disabled at device");
                self.device.disable(handle)
            }
            (None, None) => Ok(()),
        }
    }

    /// Sync `handle` and, for a virtual sensor, every source it consumes
    pub(crate) fn sync_with_sources(&self, state: &mut HubState, handle: SensorHandle) -> Result<(), DeviceError> {
        let sources: Vec<SensorHandle> = state
            .virtual_sensors
            .get(&handle)
            .map(|vs| vs.sources().to_vec())
            .unwrap_or_default();
        self.sync_device(state, handle)?;
        for source in sources {
            self.sync_device(state, source)?;
        }
        Ok(())
    }

    pub(crate) fn sync_logged(&self, state: &mut HubState, handle: SensorHandle) {
        if let Err(e) = self.sync_with_sources(state, handle) {
            warn!(handle = %handle, error = %e, "device sync failed");
        }
    }

    /// Disable every device-backed sensor and forget outstanding flushes
    fn disable_all(&self, state: &mut HubState) {
        let enabled: Vec<SensorHandle> = state
            .device_enabled
            .keys()
            .copied()
            .filter(|h| state.sensors.origin(*h).is_some_and(SensorOrigin::is_device_backed))
            .collect();
        for handle in enabled {
            state.device_enabled.remove(&handle);
            if let Err(e) = self.device.disable(handle) {
                warn!(handle = %handle, error = %e, "disable failed");
            }
        }

        state.active.clear_all_pending_flushes();
        for conn in self.live_connections(state).events {
            for (handle, info) in conn.subscriptions() {
                if info.first_flush_pending {
                    conn.set_first_flush_pending(handle, false);
                }
            }
        }
        info!("all sensors disabled");
    }

    /// Keep every current subscription off the device until it is enabled again
    fn park_all(&self, state: &mut HubState) {
        let handles: Vec<SensorHandle> = state
            .active
            .handles()
            .filter(|h| state.sensors.origin(*h) != Some(SensorOrigin::Runtime))
            .collect();
        state.parked.extend(handles);
        debug!(parked = state.parked.len(), "subscriptions parked");
    }

    /// Re-evaluate every active sensor against the current mode
    fn enable_all(&self, state: &mut HubState) {
        state.parked.clear();
        let handles: Vec<SensorHandle> = state.active.handles().collect();
        for handle in handles {
            self.sync_logged(state, handle);
        }
        info!(active = state.active.len(), "sensors re-enabled");
    }

    fn suspend_direct_connections(&self, state: &mut HubState) {
        for conn in self.live_connections(state).directs {
            for handle in conn.suspend() {
                if let Err(e) = self.device.configure_direct_report(conn.channel_id(), handle, RateLevel::Stop) {
                    warn!(channel = conn.channel_id(), handle = %handle, error = %e, "stopping direct report failed");
                }
            }
        }
    }

    fn resume_direct_connections(&self, state: &mut HubState) {
        for conn in self.live_connections(state).directs {
            for (handle, rate) in conn.resume() {
                if let Err(e) = self.device.configure_direct_report(conn.channel_id(), handle, rate) {
                    warn!(channel = conn.channel_id(), handle = %handle, error = %e, "recovering direct report failed");
                }
            }
        }
    }

    // ---- wake lock ----

    pub(crate) fn release_wake_lock_if_idle(&self, state: &mut HubState) {
        if !self.wake_lock.is_held() {
            return;
        }
        let needed = self
            .live_connections(state)
            .events
            .iter()
            .any(|c| c.needs_wake_lock());
        if !needed {
            self.wake_lock.release();
        }
    }

    /// Watchdog expiry: forget every outstanding ack and drop the lock
    pub(crate) fn force_release_wake_lock(&self) {
        self.with_state(|state| {
            for conn in self.live_connections(state).events {
                conn.reset_wake_lock_ref_count();
            }
            self.wake_lock.release();
        });
    }

    // ---- bookkeeping ----

    pub(crate) fn update_proximity(&self, state: &HubState) {
        let active = state
            .active
            .handles()
            .any(|h| state.sensors.get(h).is_some_and(SensorDescriptor::is_proximity));
        self.proximity.update(active);
    }

    pub(crate) fn record_gauges(&self, state: &HubState) {
        observability::metrics::record_active_sensors(state.active.len());
        observability::metrics::record_active_connections(state.connections.len());
    }

    /// Sampling period after range clamping and the high-rate cap
    fn effective_period(&self, sensor: &SensorDescriptor, caller: &ClientIdentity, requested_ns: i64) -> i64 {
        let period = sensor.clamp_period(requested_ns);
        let cap = self.settings.rate_cap_period_ns;
        let capped_type = matches!(
            sensor.sensor_type,
            SensorType::Accelerometer | SensorType::Gyroscope | SensorType::MagneticField
        );
        if capped_type
            && cap > 0
            && period < cap
            && self.oracle.target_sdk_version(caller) >= self.settings.rate_cap_min_target_sdk
            && !self.oracle.can_access(sensor, AccessOperation::HighSamplingRate, caller)
        {
            debug!(handle = %sensor.handle, requested_ns, cap, "sampling period capped");
            return cap;
        }
        period
    }

    // ---- subscription ----

    fn enable_locked(
        &self,
        state: &mut HubState,
        conn: &Arc<EventConnection>,
        handle: SensorHandle,
        period_ns: i64,
        latency_ns: i64,
    ) -> HubResult<()> {
        let entry = state
            .sensors
            .entry(handle)
            .cloned()
            .ok_or(HubError::SensorNotFound(handle))?;
        let sensor = &entry.descriptor;

        if !self.oracle.can_access(sensor, AccessOperation::Enable, conn.identity()) {
            return Err(HubError::permission_denied(format!(
                "{} may not enable {}",
                conn.identity(),
                sensor.name
            )));
        }
        if !state.mode.may_enable(conn.package()) {
            return Err(HubError::invalid_operation(format!(
                "{} may not enable sensors in {} mode",
                conn.package(),
                state.mode.mode()
            )));
        }
        if period_ns < 0 || latency_ns < 0 {
            return Err(HubError::invalid_argument("negative sampling period or latency"));
        }

        let period = self.effective_period(sensor, conn.identity(), period_ns);
        let is_virtual = entry.origin == SensorOrigin::Virtual;

        let sub = state.active.subscribe(handle, conn.id(), is_virtual);
        conn.add_sensor(handle, period, latency_ns);
        let was_parked = state.parked.remove(&handle);

        if sub.created {
            state.recent.mark_stale(handle);
            if let Some(vs) = state.virtual_sensors.get_mut(&handle) {
                vs.reset();
            }
        }

        if let Err(e) = self.sync_with_sources(state, handle) {
            warn!(handle = %handle, error = %e, "activation failed, rolling back");
            conn.remove_sensor(handle);
            state.active.unsubscribe(handle, conn.id());
            if was_parked && state.active.is_active(handle) {
                state.parked.insert(handle);
            }
            self.sync_logged(state, handle);
            return Err(e.into());
        }

        if !sub.created && sub.added && sensor.is_on_change() {
            if let Some(event) = state.recent.current(handle).cloned() {
                if conn.send_single(event, sensor.wake_up) && sensor.wake_up {
                    self.wake_lock.acquire();
                }
            }
        }

        let needs_first_flush = !sub.created
            && sub.added
            && sensor.reporting_mode == ReportingMode::Continuous
            && entry.origin.is_device_backed()
            && self.hal_version.supports_flush();
        if needs_first_flush {
            conn.set_first_flush_pending(handle, true);
            match self.device.flush(handle) {
                Ok(()) => {
                    state.active.add_pending_flush(handle, conn.id());
                }
                Err(e) => {
                    warn!(handle = %handle, error = %e, "first flush failed");
                    conn.set_first_flush_pending(handle, false);
                }
            }
        }

        Ok(())
    }

    #[instrument(
        name = "hub_enable",
        skip(self, conn),
        fields(connection = %conn.id(), handle = %handle)
    )]
    pub(crate) fn enable(
        &self,
        conn: &Arc<EventConnection>,
        handle: SensorHandle,
        period_ns: i64,
        latency_ns: i64,
    ) -> HubResult<()> {
        self.with_state(|state| {
            let result = self.enable_locked(state, conn, handle, period_ns, latency_ns);
            self.record_registration(state, conn, handle, period_ns, latency_ns, true, &result);
            if result.is_ok() {
                self.update_proximity(state);
                self.record_gauges(state);
            }
            result
        })
    }

    #[instrument(
        name = "hub_disable",
        skip(self, conn),
        fields(connection = %conn.id(), handle = %handle)
    )]
    pub(crate) fn disable(&self, conn: &Arc<EventConnection>, handle: SensorHandle) -> HubResult<()> {
        self.with_state(|state| {
            let result = if conn.remove_sensor(handle) | state.active.unsubscribe(handle, conn.id()).removed {
                self.sync_with_sources(state, handle).map_err(HubError::from)
            } else {
                Err(HubError::SensorNotFound(handle))
            };
            self.record_registration(state, conn, handle, 0, 0, false, &result);
            self.update_proximity(state);
            self.release_wake_lock_if_idle(state);
            self.record_gauges(state);
            result
        })
    }

    pub(crate) fn set_event_rate(
        &self,
        conn: &Arc<EventConnection>,
        handle: SensorHandle,
        period_ns: i64,
    ) -> HubResult<()> {
        if period_ns < 0 {
            return Err(HubError::invalid_argument("negative sampling period"));
        }
        self.with_state(|state| {
            let sensor = state
                .sensors
                .get(handle)
                .cloned()
                .ok_or(HubError::SensorNotFound(handle))?;
            if !self.oracle.can_access(&sensor, AccessOperation::Configure, conn.identity()) {
                return Err(HubError::permission_denied(format!("{} may not configure {}", conn.identity(), sensor.name)));
            }
            let period = self.effective_period(&sensor, conn.identity(), period_ns);
            if !conn.set_event_rate(handle, period) {
                return Err(HubError::not_found(format!("subscription to {handle}")));
            }
            self.sync_with_sources(state, handle).map_err(HubError::from)
        })
    }

    #[instrument(name = "hub_flush", skip(self, conn), fields(connection = %conn.id()))]
    pub(crate) fn flush(&self, conn: &Arc<EventConnection>) -> HubResult<()> {
        let result = self.with_state(|state| {
            let mut result = Ok(());
            for handle in conn.active_handles() {
                let Some(entry) = state.sensors.entry(handle).cloned() else {
                    continue;
                };
                let sensor = &entry.descriptor;
                if sensor.is_one_shot() {
                    warn!(handle = %handle, "flush called on a one-shot sensor");
                    result = Err(HubError::invalid_operation(format!("sensor {handle} is one-shot")));
                    continue;
                }
                if !self.oracle.can_access(sensor, AccessOperation::Flush, conn.identity()) {
                    result = Err(HubError::permission_denied(format!(
                        "{} may not flush {}",
                        conn.identity(),
                        sensor.name
                    )));
                    continue;
                }

                let trivial = !entry.origin.is_device_backed() || !self.hal_version.supports_flush();
                if trivial {
                    conn.increment_pending_flush(handle);
                    continue;
                }
                match self.device.flush(handle) {
                    Ok(()) => {
                        state.active.add_pending_flush(handle, conn.id());
                    }
                    Err(e) => {
                        warn!(handle = %handle, error = %e, "flush failed");
                        result = Err(e.into());
                    }
                }
            }
            result
        });
        conn.send_pending_flushes();
        result
    }

    pub(crate) fn acknowledge_wake_events(&self, conn: &Arc<EventConnection>, count: u32) {
        let remaining = conn.acknowledge(count);
        debug!(connection = %conn.id(), count, remaining, "wake-up events acknowledged");
        self.wake_lock.notify_activity();
        self.with_state(|state| self.release_wake_lock_if_idle(state));
    }

    /// Remove `conn` everywhere. Idempotent.
    pub(crate) fn destroy_event_connection(&self, conn: &Arc<EventConnection>) {
        self.with_state(|state| {
            let registered = state.connections.remove_event(conn.id());
            let handles = conn.active_handles();
            if !registered && handles.is_empty() {
                return;
            }
            for handle in &handles {
                conn.remove_sensor(*handle);
            }
            state.active.remove_connection(conn.id());
            for handle in handles {
                self.sync_logged(state, handle);
            }
            conn.reset_wake_lock_ref_count();
            self.release_wake_lock_if_idle(state);
            self.update_proximity(state);
            self.record_gauges(state);
            debug!(connection = %conn.id(), "event connection destroyed");
        });
    }

    pub(crate) fn destroy_direct_connection(&self, conn: &Arc<DirectConnection>) {
        if !conn.mark_destroyed() {
            return;
        }
        self.with_state(|state| {
            state.connections.remove_direct(conn.id());
            self.record_gauges(state);
        });
        self.device.unregister_direct_channel(conn.channel_id());
        debug!(connection = %conn.id(), channel = conn.channel_id(), "direct connection destroyed");
    }

    fn record_registration(
        &self,
        state: &mut HubState,
        conn: &EventConnection,
        handle: SensorHandle,
        period_ns: i64,
        latency_ns: i64,
        activate: bool,
        result: &HubResult<()>,
    ) {
        state.history.push(RegistrationRecord {
            at: Utc::now(),
            handle,
            package: conn.package().to_string(),
            sampling_period_ns: period_ns,
            max_report_latency_ns: latency_ns,
            activate,
            status: Status::of(result),
        });
    }

    /// Drop every subscription to `handle` without touching the device
    pub(crate) fn force_unsubscribe_all(&self, state: &mut HubState, handle: SensorHandle) {
        if let Some(record) = state.active.remove_record(handle) {
            for id in record.connections() {
                if let Some(conn) = state.connections.event(*id) {
                    conn.remove_sensor(handle);
                }
            }
        }
        state.recent.remove(handle);
    }
}

/// One connection as seen in a [`HubSnapshot`]
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub package: String,
    pub uid: u32,
    pub data_injection: bool,
    pub subscriptions: Vec<(SensorHandle, SubscriptionInfo)>,
    pub wake_lock_ref_count: u32,
    pub metrics: ConnectionMetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectConnectionSummary {
    pub id: ConnectionId,
    pub package: String,
    pub channel_id: i32,
    pub stopped: bool,
    pub configs: Vec<(SensorHandle, RateLevel)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSensorSummary {
    pub handle: SensorHandle,
    pub name: String,
    pub connections: Vec<ConnectionId>,
    pub pending_flushes: usize,
    pub enabled_at_device: bool,
}

/// Serialisable diagnostic view of the hub
#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    pub mode: OperatingMode,
    pub allow_listed_package: Option<String>,
    pub wake_lock_held: bool,
    pub proximity_active: bool,
    pub hal_version: String,
    pub sensor_count: usize,
    pub active_sensors: Vec<ActiveSensorSummary>,
    pub connections: Vec<ConnectionSummary>,
    pub direct_connections: Vec<DirectConnectionSummary>,
}

/// Builder for [`SensorHub`]
pub struct SensorHubBuilder {
    device: Arc<dyn Device>,
    oracle: Arc<dyn AccessOracle>,
    settings: HubSettings,
    virtual_sensors: Vec<VirtualSensorConfig>,
}

impl SensorHubBuilder {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            oracle: Arc::new(AllowAll::default()),
            settings: HubSettings::default(),
            virtual_sensors: Vec::new(),
        }
    }

    /// Settings and virtual sensors from a loaded blueprint
    pub fn config(mut self, config: &HubConfig) -> Self {
        self.settings = config.hub.clone();
        self.virtual_sensors = config.virtual_sensors.clone();
        self
    }

    pub fn settings(mut self, settings: HubSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn AccessOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn virtual_sensor(mut self, config: VirtualSensorConfig) -> Self {
        self.virtual_sensors.push(config);
        self
    }

    /// Build the hub. Must run inside a tokio runtime.
    #[instrument(name = "hub_builder_build", skip(self))]
    pub fn build(self) -> HubResult<SensorHub> {
        let runtime = Handle::try_current().map_err(|e| HubError::NoRuntime(e.to_string()))?;

        let mut sensors = SensorRegistry::new();
        for descriptor in self.device.sensor_list() {
            let origin = if descriptor.is_dynamic {
                SensorOrigin::Dynamic
            } else {
                SensorOrigin::Hardware
            };
            sensors.add(descriptor, origin)?;
        }

        let mut virtual_sensors = HashMap::new();
        for config in &self.virtual_sensors {
            for source in &config.sources {
                if !sensors.origin(*source).is_some_and(SensorOrigin::is_device_backed) {
                    return Err(HubError::invalid_argument(format!(
                        "virtual sensor {} consumes unknown sensor {source}",
                        config.name
                    )));
                }
            }
            sensors.add(config.to_descriptor(), SensorOrigin::Virtual)?;
            virtual_sensors.insert(config.handle, build_virtual_sensor(config));
        }

        if let Some(meta) = self.settings.dynamic_meta_sensor_handle {
            let descriptor = SensorDescriptor::new(meta, "Dynamic Sensor Manager", SensorType::DynamicSensorMeta);
            sensors.add(descriptor, SensorOrigin::DynamicMeta)?;
        }

        let hal_version = self.device.hal_version();
        info!(
            sensors = sensors.len(),
            virtual_sensors = virtual_sensors.len(),
            hal = %hal_version,
            "sensor hub built"
        );

        let state = HubState {
            sensors,
            connections: ConnectionRegistry::new(),
            active: ActiveSensorTable::new(),
            recent: RecentEventCache::new(),
            mode: ModeController::new(),
            virtual_sensors,
            runtime_callbacks: HashMap::new(),
            device_enabled: HashMap::new(),
            parked: HashSet::new(),
            history: RegistrationHistory::new(self.settings.registration_history),
            deferred: Vec::new(),
        };

        let shared = HubShared {
            wake_lock: WakeLockCoordinator::new(Duration::from_millis(self.settings.wake_lock_timeout_ms)),
            runtime_queue: RuntimeQueue::new(),
            proximity: ProximityNotifier::new(runtime.clone()),
            runtime,
            hal_version,
            last_timestamp: AtomicI64::new(0),
            next_connection_id: AtomicU64::new(1),
            settings: self.settings,
            device: self.device,
            oracle: self.oracle,
            state: Mutex::new(state),
        };
        observability::metrics::record_operating_mode(OperatingMode::Normal.code());

        Ok(SensorHub {
            shared: Arc::new(shared),
        })
    }
}

/// The hub. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct SensorHub {
    shared: Arc<HubShared>,
}

impl SensorHub {
    pub fn builder(device: Arc<dyn Device>) -> SensorHubBuilder {
        SensorHubBuilder::new(device)
    }

    /// Spawn the dispatch loop, the runtime loop and the wake lock watchdog
    pub fn start(&self) -> HubWorkers {
        HubWorkers::spawn(Arc::clone(&self.shared))
    }

    pub fn settings(&self) -> &HubSettings {
        &self.shared.settings
    }

    // ---- connections ----

    /// Open a buffered event connection.
    ///
    /// Outside normal mode only the allow-listed package may connect, and data
    /// injection connections require an injection mode.
    pub fn create_event_connection(
        &self,
        identity: ClientIdentity,
        data_injection: bool,
    ) -> HubResult<EventConnectionHandle> {
        let shared = &self.shared;
        shared.with_state(|state| {
            let mode = state.mode.mode();
            if data_injection && !(mode.is_injection() && state.mode.is_allow_listed(&identity.package)) {
                return Err(HubError::invalid_operation(format!(
                    "{} may not inject data in {mode} mode",
                    identity.package
                )));
            }
            if !state.mode.may_connect(&identity.package) {
                return Err(HubError::invalid_operation(format!(
                    "{} may not connect in {mode} mode",
                    identity.package
                )));
            }

            let id = shared.next_id();
            let (conn, events) = EventConnection::new(
                id,
                identity,
                data_injection,
                shared.settings.connection_queue_capacity,
            );
            state.connections.add_event(&conn);
            shared.record_gauges(state);
            debug!(connection = %id, package = conn.package(), "event connection created");
            Ok(EventConnectionHandle::new(conn, events, Arc::downgrade(shared)))
        })
    }

    /// Open a direct channel connection over client-provided shared memory
    pub fn create_direct_connection(
        &self,
        identity: ClientIdentity,
        descriptor: DirectChannelDescriptor,
    ) -> HubResult<DirectConnectionHandle> {
        if descriptor.format != DirectFormat::SensorsEvent {
            return Err(HubError::invalid_argument(format!(
                "unsupported direct channel format {:?}",
                descriptor.format
            )));
        }
        if descriptor.memory_type == DirectMemoryType::Ashmem && descriptor.size == 0 {
            return Err(HubError::invalid_argument("ashmem channel needs a positive size"));
        }

        let shared = &self.shared;
        shared.with_state(|state| {
            if !state.mode.may_connect(&identity.package) {
                return Err(HubError::invalid_operation(format!(
                    "{} may not connect in {} mode",
                    identity.package,
                    state.mode.mode()
                )));
            }
            let snapshot = shared.live_connections(state);
            if snapshot.directs.iter().any(|c| c.is_equivalent(&descriptor)) {
                return Err(HubError::already_exists(format!(
                    "direct channel on resource {}",
                    descriptor.resource_id
                )));
            }

            let channel_id = shared.device.register_direct_channel(&descriptor)?;
            let conn = DirectConnection::new(shared.next_id(), identity, channel_id, descriptor);
            if state.mode.mode() == OperatingMode::Restricted && !state.mode.is_allow_listed(conn.package()) {
                conn.suspend();
            }
            state.connections.add_direct(&conn);
            shared.record_gauges(state);
            debug!(connection = %conn.id(), channel = channel_id, "direct connection created");
            Ok(DirectConnectionHandle::new(conn, Arc::downgrade(shared)))
        })
    }

    /// Set the report rate of one sensor on a direct channel.
    ///
    /// Returns the device's report token (0 when stopped).
    pub fn configure_direct_channel(
        &self,
        conn: &DirectConnectionHandle,
        handle: SensorHandle,
        rate: RateLevel,
    ) -> HubResult<i32> {
        let conn = conn.connection();
        let shared = &self.shared;
        shared.with_state(|state| {
            if conn.is_destroyed() {
                return Err(HubError::not_found(format!("connection {}", conn.id())));
            }
            let entry = state
                .sensors
                .entry(handle)
                .ok_or(HubError::SensorNotFound(handle))?;
            if !entry.origin.is_device_backed() {
                return Err(HubError::invalid_argument(format!(
                    "sensor {handle} does not support direct report"
                )));
            }
            if !shared
                .oracle
                .can_access(&entry.descriptor, AccessOperation::Configure, conn.identity())
            {
                return Err(HubError::permission_denied(format!("{} may not configure {handle}", conn.identity())));
            }
            if conn.is_stopped() {
                conn.record_config(handle, rate);
                return Ok(0);
            }
            let token = shared.device.configure_direct_report(conn.channel_id(), handle, rate)?;
            conn.record_config(handle, rate);
            Ok(token)
        })
    }

    /// Close a connection now instead of waiting for its handle to drop
    pub fn destroy_connection(&self, conn: &EventConnectionHandle) {
        self.shared.destroy_event_connection(conn.connection());
    }

    pub fn destroy_direct_connection(&self, conn: &DirectConnectionHandle) {
        self.shared.destroy_direct_connection(conn.connection());
    }

    // ---- subscriptions ----

    pub fn enable(
        &self,
        conn: &EventConnectionHandle,
        handle: SensorHandle,
        sampling_period_ns: i64,
        max_report_latency_ns: i64,
    ) -> HubResult<()> {
        self.shared
            .enable(conn.connection(), handle, sampling_period_ns, max_report_latency_ns)
    }

    pub fn disable(&self, conn: &EventConnectionHandle, handle: SensorHandle) -> HubResult<()> {
        self.shared.disable(conn.connection(), handle)
    }

    pub fn set_event_rate(
        &self,
        conn: &EventConnectionHandle,
        handle: SensorHandle,
        sampling_period_ns: i64,
    ) -> HubResult<()> {
        self.shared
            .set_event_rate(conn.connection(), handle, sampling_period_ns)
    }

    /// Flush every sensor the connection subscribes to
    pub fn flush(&self, conn: &EventConnectionHandle) -> HubResult<()> {
        self.shared.flush(conn.connection())
    }

    /// Acknowledge `count` delivered wake-up events
    pub fn acknowledge_wake_events(&self, conn: &EventConnectionHandle, count: u32) {
        self.shared.acknowledge_wake_events(conn.connection(), count);
    }

    // ---- modes ----

    #[instrument(name = "hub_change_mode", skip(self))]
    pub fn change_mode(&self, target: OperatingMode, package: Option<&str>) -> HubResult<()> {
        let shared = &self.shared;
        shared.with_state(|state| {
            let from = state.mode.mode();
            match state.mode.plan(target, package)? {
                ModeTransition::NoOp => return Ok(()),
                ModeTransition::EnterRestricted => {
                    shared.disable_all(state);
                    shared.park_all(state);
                    shared.suspend_direct_connections(state);
                    state.mode.commit(target, package);
                }
                ModeTransition::ExitRestricted => {
                    state.mode.commit(OperatingMode::Normal, None);
                    shared.enable_all(state);
                    shared.resume_direct_connections(state);
                }
                ModeTransition::EnterInjection(mode) => {
                    shared.disable_all(state);
                    if let Err(e) = shared.device.set_mode(mode) {
                        warn!(mode = %mode, error = %e, "device rejected mode, re-enabling sensors");
                        shared.enable_all(state);
                        return Err(e.into());
                    }
                    state.mode.commit(mode, package);
                    if mode == OperatingMode::ReplayDataInjection {
                        shared.enable_all(state);
                    } else {
                        shared.park_all(state);
                    }
                }
                ModeTransition::ExitInjection(mode) => {
                    shared.disable_all(state);
                    if let Err(e) = shared.device.set_mode(OperatingMode::Normal) {
                        warn!(mode = %mode, error = %e, "device could not return to normal");
                        if mode == OperatingMode::ReplayDataInjection {
                            shared.enable_all(state);
                        } else {
                            shared.park_all(state);
                        }
                        return Err(e.into());
                    }
                    state.mode.commit(OperatingMode::Normal, None);
                    shared.enable_all(state);
                }
            }
            info!(from = %from, to = %target, package = ?package, "operating mode changed");
            shared.update_proximity(state);
            Ok(())
        })
    }

    pub fn mode(&self) -> OperatingMode {
        lock(&self.shared.state).mode.mode()
    }

    /// Inject an event through a data injection connection
    pub fn inject_event(&self, conn: &EventConnectionHandle, event: SensorEvent) -> HubResult<()> {
        let conn = conn.connection();
        if !conn.is_data_injection() {
            return Err(HubError::invalid_operation(format!(
                "connection {} was not opened for injection",
                conn.id()
            )));
        }
        let mode = self.mode();
        match mode {
            OperatingMode::DataInjection | OperatingMode::ReplayDataInjection => {
                self.shared.device.inject_event(&event)?;
                Ok(())
            }
            OperatingMode::HalBypassReplayDataInjection => {
                self.shared.runtime_queue.push(event);
                Ok(())
            }
            _ => Err(HubError::invalid_operation(format!(
                "injection is not possible in {mode} mode"
            ))),
        }
    }

    // ---- runtime sensors ----

    /// Register a software-defined sensor owned by `device_id`.
    ///
    /// The handle in `descriptor` is ignored; a fresh one is allocated.
    pub fn register_runtime_sensor(
        &self,
        mut descriptor: SensorDescriptor,
        device_id: i32,
        callback: Arc<dyn RuntimeSensorCallback>,
    ) -> HubResult<SensorHandle> {
        if device_id == DEFAULT_DEVICE_ID {
            return Err(HubError::invalid_argument("runtime sensors need a non-default device id"));
        }
        self.shared.with_state(|state| {
            let handle = state
                .sensors
                .allocate_runtime_handle()
                .ok_or_else(|| HubError::invalid_operation("runtime sensor handles exhausted"))?;
            descriptor.handle = handle;
            descriptor.device_id = device_id;
            descriptor.is_virtual = false;
            descriptor.is_dynamic = false;
            state.sensors.add(descriptor, SensorOrigin::Runtime)?;
            state.runtime_callbacks.entry(device_id).or_insert(callback);
            info!(handle = %handle, device_id, "runtime sensor registered");
            Ok(handle)
        })
    }

    /// Remove a runtime sensor, unsubscribing every connection
    pub fn unregister_runtime_sensor(&self, handle: SensorHandle) -> HubResult<()> {
        let shared = &self.shared;
        shared.with_state(|state| {
            let device_id = match state.sensors.entry(handle) {
                Some(entry) if entry.origin == SensorOrigin::Runtime => entry.descriptor.device_id,
                _ => return Err(HubError::SensorNotFound(handle)),
            };
            shared.force_unsubscribe_all(state, handle);
            if let Some(params) = state.device_enabled.remove(&handle) {
                if let Some(callback) = state.runtime_callbacks.get(&device_id).cloned() {
                    state.deferred.push(RuntimeNotice { callback, handle, enabled: false, params });
                }
            }
            state.sensors.remove(handle);
            if state.sensors.runtime_handles_for_device(device_id).is_empty() {
                state.runtime_callbacks.remove(&device_id);
            }
            shared.update_proximity(state);
            shared.record_gauges(state);
            info!(handle = %handle, device_id, "runtime sensor unregistered");
            Ok(())
        })
    }

    /// Queue an event from a runtime sensor for the runtime loop
    pub fn send_runtime_event(&self, event: SensorEvent) -> HubResult<()> {
        let origin = lock(&self.shared.state).sensors.origin(event.sensor);
        if origin != Some(SensorOrigin::Runtime) {
            return Err(HubError::SensorNotFound(event.sensor));
        }
        self.shared.runtime_queue.push(event);
        Ok(())
    }

    // ---- proximity ----

    pub fn add_proximity_active_listener(&self, listener: Arc<dyn ProximityActiveListener>) -> HubResult<()> {
        self.shared.proximity.add_listener(listener)
    }

    pub fn remove_proximity_active_listener(&self, listener: &Arc<dyn ProximityActiveListener>) -> HubResult<()> {
        self.shared.proximity.remove_listener(listener)
    }

    // ---- manual driving ----

    /// Run one dispatch cycle on the calling thread.
    ///
    /// For callers that drive the hub without [`SensorHub::start`].
    pub fn poll_once(&self) -> Result<usize, crate::DispatchError> {
        crate::dispatch::poll_once(&self.shared)
    }

    /// Deliver everything queued for the runtime loop on the calling thread
    pub fn drain_runtime_events(&self) -> usize {
        crate::runtime::drain_once(&self.shared)
    }

    // ---- read-only ----

    /// Sensors visible to `caller`, debug sensors excluded
    pub fn sensor_list(&self, caller: &ClientIdentity) -> Vec<SensorDescriptor> {
        let state = lock(&self.shared.state);
        state
            .sensors
            .list(false)
            .into_iter()
            .filter(|s| self.shared.oracle.can_access(s, AccessOperation::List, caller))
            .collect()
    }

    /// Hot-plugged sensors visible to `caller`
    pub fn dynamic_sensor_list(&self, caller: &ClientIdentity) -> Vec<SensorDescriptor> {
        let state = lock(&self.shared.state);
        state
            .sensors
            .handles_with_origin(SensorOrigin::Dynamic)
            .into_iter()
            .filter_map(|h| state.sensors.get(h).cloned())
            .filter(|s| self.shared.oracle.can_access(s, AccessOperation::List, caller))
            .collect()
    }

    /// Every sensor, including debug ones
    pub fn debug_sensor_list(&self) -> Vec<SensorDescriptor> {
        lock(&self.shared.state).sensors.list(true)
    }

    pub fn is_active(&self, handle: SensorHandle) -> bool {
        lock(&self.shared.state).active.is_active(handle)
    }

    pub fn is_wake_lock_held(&self) -> bool {
        self.shared.wake_lock.is_held()
    }

    /// Most recent cached sample of `handle`
    pub fn last_event(&self, handle: SensorHandle) -> Option<SensorEvent> {
        lock(&self.shared.state).recent.last(handle).cloned()
    }

    pub fn recent_registrations(&self) -> Vec<RegistrationRecord> {
        lock(&self.shared.state).history.records()
    }

    pub fn snapshot(&self) -> HubSnapshot {
        let shared = &self.shared;
        shared.with_state(|state| {
            let live = shared.live_connections(state);
            let active_sensors = state
                .active
                .handles()
                .filter_map(|h| {
                    let record = state.active.get(h)?;
                    Some(ActiveSensorSummary {
                        handle: h,
                        name: state.sensors.get(h).map(|s| s.name.clone()).unwrap_or_default(),
                        connections: record.connections().to_vec(),
                        pending_flushes: record.pending_flushes().count(),
                        enabled_at_device: state.device_enabled.contains_key(&h),
                    })
                })
                .collect();

            HubSnapshot {
                mode: state.mode.mode(),
                allow_listed_package: state.mode.allow_listed_package().map(str::to_owned),
                wake_lock_held: shared.wake_lock.is_held(),
                proximity_active: shared.proximity.is_active(),
                hal_version: shared.hal_version.to_string(),
                sensor_count: state.sensors.len(),
                active_sensors,
                connections: live
                    .events
                    .iter()
                    .map(|c| ConnectionSummary {
                        id: c.id(),
                        package: c.package().to_string(),
                        uid: c.identity().uid,
                        data_injection: c.is_data_injection(),
                        subscriptions: c.subscriptions(),
                        wake_lock_ref_count: c.wake_lock_ref_count(),
                        metrics: c.metrics(),
                    })
                    .collect(),
                direct_connections: live
                    .directs
                    .iter()
                    .map(|c| DirectConnectionSummary {
                        id: c.id(),
                        package: c.package().to_string(),
                        channel_id: c.channel_id(),
                        stopped: c.is_stopped(),
                        configs: c.configs(),
                    })
                    .collect(),
            }
        })
    }
}

impl std::fmt::Debug for SensorHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorHub")
            .field("hal_version", &self.shared.hal_version)
            .field("wake_lock_held", &self.shared.wake_lock.is_held())
            .finish()
    }
}
