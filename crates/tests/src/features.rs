//! Hot-plug, modes, runtime sensors, proximity and the background workers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{
    DeviceError, HalVersion, HubSettings, OperatingMode, ProximityActiveListener,
    RuntimeSensorCallback, SensorDescriptor, SensorEvent, SensorHandle, SensorType,
};
use sensor_hub::{DispatchError, HubError, Status};
use sim_device::{DeviceCall, ScriptedDevice};
use tokio::sync::mpsc;

use crate::support::*;

const DYN_HR: SensorHandle = SensorHandle::new(0x50);

fn hotplug_settings() -> HubSettings {
    HubSettings {
        dynamic_meta_sensor_handle: Some(META),
        ..Default::default()
    }
}

fn heart_rate(handle: SensorHandle) -> SensorDescriptor {
    SensorDescriptor::new(handle, "external heart rate", SensorType::HeartRate)
}

#[tokio::test]
async fn test_dynamic_sensor_connect_and_disconnect() {
    let device = device();
    let hub = hub_with(&device, hotplug_settings());
    let mut watcher = connect(&hub, APP);
    hub.enable(&watcher, META, 0, 0).unwrap();

    device.push_batch(vec![SensorEvent::dynamic_connected(META, 10, heart_rate(DYN_HR))]);
    hub.poll_once().unwrap();

    let notices = watcher.drain();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].dynamic_meta().is_some_and(|m| m.connected && m.handle == DYN_HR));
    let listed = hub.dynamic_sensor_list(&identity(APP));
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_dynamic);

    let mut user = connect(&hub, APP);
    hub.enable(&user, DYN_HR, 0, 0).unwrap();
    assert!(device.enabled_handles().contains(&DYN_HR));
    device.push_batch(vec![data(DYN_HR, 11)]);
    hub.poll_once().unwrap();
    assert_eq!(user.drain().len(), 1);

    device.push_batch(vec![SensorEvent::dynamic_disconnected(META, 12, DYN_HR)]);
    hub.poll_once().unwrap();
    assert_eq!(watcher.drain().len(), 1);
    assert!(!user.connection().has_sensor(DYN_HR));
    assert!(!hub.is_active(DYN_HR));
    assert!(hub.dynamic_sensor_list(&identity(APP)).is_empty());
    assert!(matches!(
        hub.enable(&user, DYN_HR, 0, 0),
        Err(HubError::SensorNotFound(_))
    ));

    // the retired handle is refused until the device reconnects
    device.push_batch(vec![SensorEvent::dynamic_connected(META, 13, heart_rate(DYN_HR))]);
    hub.poll_once().unwrap();
    assert!(hub.dynamic_sensor_list(&identity(APP)).is_empty());
}

#[tokio::test]
async fn test_reconnect_disconnects_dynamic_sensors_and_recycles_handles() {
    let device = device();
    let hub = hub_with(&device, hotplug_settings());
    let mut watcher = connect(&hub, APP);
    hub.enable(&watcher, META, 0, 0).unwrap();

    device.push_batch(vec![SensorEvent::dynamic_connected(META, 100, heart_rate(DYN_HR))]);
    hub.poll_once().unwrap();
    let user = connect(&hub, APP);
    hub.enable(&user, DYN_HR, 0, 0).unwrap();
    watcher.drain();

    device.set_reconnecting(true);
    device.push_error(DeviceError::DeadObject);
    assert_eq!(hub.poll_once().unwrap(), 0);

    let notices = watcher.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].timestamp, 100);
    assert!(notices[0].dynamic_meta().is_some_and(|m| !m.connected && m.handle == DYN_HR));
    assert!(!user.connection().has_sensor(DYN_HR));
    assert!(device.calls().contains(&DeviceCall::Reconnect));

    device.push_batch(vec![SensorEvent::dynamic_connected(META, 200, heart_rate(DYN_HR))]);
    hub.poll_once().unwrap();
    assert_eq!(hub.dynamic_sensor_list(&identity(APP)).len(), 1);
}

#[tokio::test]
async fn test_failed_reconnect_is_fatal() {
    let device = device();
    let hub = hub_with(&device, hotplug_settings());

    device.set_reconnecting(true);
    device.fail_next_reconnect(DeviceError::failed("hal gone"));
    device.push_error(DeviceError::DeadObject);
    assert!(matches!(hub.poll_once(), Err(DispatchError::Fatal(_))));
}

#[tokio::test]
async fn test_restricted_mode_parks_subscriptions_until_re_enabled() {
    let device = device();
    let hub = hub(&device);
    let app = connect(&hub, APP);
    let tool = connect(&hub, TOOL);
    hub.enable(&app, ACCEL, 0, 0).unwrap();
    hub.enable(&tool, LIGHT, 0, 0).unwrap();

    hub.change_mode(OperatingMode::Restricted, Some(TOOL)).unwrap();
    assert!(device.enabled_handles().is_empty());
    assert!(hub.is_active(ACCEL), "subscriptions survive the mode change");
    assert!(hub.is_active(LIGHT));

    assert!(matches!(
        hub.enable(&app, GYRO, 0, 0),
        Err(HubError::InvalidOperation(_))
    ));
    assert!(matches!(
        hub.create_event_connection(identity(APP), false),
        Err(HubError::InvalidOperation(_))
    ));
    hub.enable(&tool, GYRO, 0, 0).unwrap();
    assert_eq!(device.enabled_handles(), vec![GYRO]);

    hub.change_mode(OperatingMode::Normal, None).unwrap();
    assert_eq!(device.enabled_handles(), vec![ACCEL, GYRO, LIGHT]);

    let history = hub.recent_registrations();
    let rejected = history.iter().find(|r| r.handle == GYRO && r.package == APP).unwrap();
    assert_eq!(rejected.status, Status::InvalidOperation);
}

#[tokio::test]
async fn test_mode_change_requires_package() {
    let device = device();
    let hub = hub(&device);
    assert!(matches!(
        hub.change_mode(OperatingMode::Restricted, None),
        Err(HubError::InvalidArgument(_))
    ));
    hub.change_mode(OperatingMode::Normal, None).unwrap();
    assert_eq!(hub.mode(), OperatingMode::Normal);
}

#[tokio::test]
async fn test_trivial_flush_on_old_hal() {
    let device = Arc::new(ScriptedDevice::new(sensors()).with_hal_version(HalVersion::new(0, 9)));
    let hub = hub(&device);
    let mut conn = connect(&hub, APP);
    hub.enable(&conn, ACCEL, 0, 0).unwrap();
    hub.enable(&conn, LIGHT, 0, 0).unwrap();
    hub.enable(&conn, SIG_MOTION, 0, 0).unwrap();

    let result = hub.flush(&conn);
    assert!(matches!(result, Err(HubError::InvalidOperation(_))));

    let markers = conn.drain();
    assert_eq!(markers.len(), 2);
    assert!(markers.iter().all(SensorEvent::is_flush_complete));
    assert!(!device.calls().iter().any(|c| matches!(c, DeviceCall::Flush(_))));
}

#[tokio::test]
async fn test_registration_history_is_bounded() {
    let device = device();
    let hub = hub_with(
        &device,
        HubSettings {
            registration_history: 3,
            ..Default::default()
        },
    );
    let conn = connect(&hub, APP);
    for _ in 0..4 {
        hub.enable(&conn, LIGHT, 0, 0).unwrap();
        hub.disable(&conn, LIGHT).unwrap();
    }

    let history = hub.recent_registrations();
    assert_eq!(history.len(), 3);
    assert!(!history[2].activate);
    assert!(history.windows(2).all(|w| w[0].at <= w[1].at));
}

struct ChannelListener(mpsc::UnboundedSender<bool>);

impl ProximityActiveListener for ChannelListener {
    fn on_proximity_active(&self, is_active: bool) {
        let _ = self.0.send(is_active);
    }
}

#[tokio::test]
async fn test_proximity_listener_sees_changes_in_order() {
    let device = device();
    let hub = hub(&device);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener: Arc<dyn ProximityActiveListener> = Arc::new(ChannelListener(tx));
    hub.add_proximity_active_listener(listener.clone()).unwrap();
    assert!(matches!(
        hub.add_proximity_active_listener(listener.clone()),
        Err(HubError::AlreadyExists(_))
    ));

    let conn = connect(&hub, APP);
    for _ in 0..3 {
        hub.enable(&conn, PROX, 0, 0).unwrap();
        hub.disable(&conn, PROX).unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..7 {
        let state = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(state);
    }
    assert_eq!(seen, vec![false, true, false, true, false, true, false]);

    hub.remove_proximity_active_listener(&listener).unwrap();
    assert!(matches!(
        hub.remove_proximity_active_listener(&listener),
        Err(HubError::NotFound(_))
    ));
}

#[derive(Default)]
struct RecordingCallback(Mutex<Vec<(SensorHandle, bool, i64)>>);

impl RuntimeSensorCallback for RecordingCallback {
    fn on_configuration_changed(&self, handle: SensorHandle, enabled: bool, period_ns: i64, _: i64) {
        self.0.lock().unwrap().push((handle, enabled, period_ns));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runtime_sensor_events_flow_through_workers() {
    let device = device();
    let hub = hub(&device);
    let workers = hub.start();
    let callback = Arc::new(RecordingCallback::default());

    let handle = hub
        .register_runtime_sensor(
            SensorDescriptor::new(SensorHandle::new(0), "virtual step", SensorType::StepCounter),
            3,
            callback.clone(),
        )
        .unwrap();
    let mut conn = connect(&hub, APP);
    hub.enable(&conn, handle, 40_000_000, 0).unwrap();
    assert_eq!(callback.0.lock().unwrap().clone(), vec![(handle, true, 40_000_000)]);

    for ts in [3, 1, 2] {
        hub.send_runtime_event(data(handle, ts)).unwrap();
    }
    let mut got = Vec::new();
    while got.len() < 3 {
        got.push(recv_within(&mut conn, Duration::from_secs(2)).await.timestamp);
    }
    got.sort();
    assert_eq!(got, vec![1, 2, 3]);

    hub.disable(&conn, handle).unwrap();
    assert_eq!(callback.0.lock().unwrap().last().map(|c| c.1), Some(false));
    assert!(!device.calls().iter().any(|c| matches!(c, DeviceCall::Enable(h) if *h == handle)));

    workers.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_queue_overflow_drops_excess() {
    let device = device();
    let hub = hub_with(
        &device,
        HubSettings {
            runtime_queue_capacity: 2,
            ..Default::default()
        },
    );
    let handle = hub
        .register_runtime_sensor(
            SensorDescriptor::new(SensorHandle::new(0), "virtual light", SensorType::Light),
            9,
            Arc::new(RecordingCallback::default()),
        )
        .unwrap();
    let mut conn = connect(&hub, APP);
    hub.enable(&conn, handle, 0, 0).unwrap();

    for ts in 0..5 {
        hub.send_runtime_event(data(handle, ts)).unwrap();
    }
    assert_eq!(hub.drain_runtime_events(), 2);
    assert_eq!(timestamps(&conn.drain()), vec![0, 1]);
    assert_eq!(hub.drain_runtime_events(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watchdog_releases_unacknowledged_wake_lock() {
    let device = device();
    let hub = hub_with(
        &device,
        HubSettings {
            wake_lock_timeout_ms: 100,
            ..Default::default()
        },
    );
    let workers = hub.start();
    let mut conn = connect(&hub, APP);
    hub.enable(&conn, PROX, 0, 0).unwrap();

    device.push_batch(vec![data(PROX, 1)]);
    let event = recv_within(&mut conn, Duration::from_secs(2)).await;
    assert!(event.wake_up_ack_required);
    assert!(hub.is_wake_lock_held());

    // never acknowledged
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!hub.is_wake_lock_held());
    assert_eq!(conn.connection().wake_lock_ref_count(), 0);

    workers.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fatal_poll_error_stops_workers() {
    let device = device();
    let hub = hub(&device);
    device.push_error(DeviceError::failed("bus reset"));

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        hub.start().run_until(std::future::pending()),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(DispatchError::Fatal(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connections_churn_while_dispatching() {
    let device = device();
    let hub = hub(&device);
    let workers = hub.start();
    let mut keeper = connect(&hub, APP);
    hub.enable(&keeper, LIGHT, 0, 0).unwrap();

    for round in 0..50_i64 {
        let transient = connect(&hub, APP);
        hub.enable(&transient, LIGHT, 0, 0).unwrap();
        device.push_batch(vec![data(LIGHT, round)]);
        tokio::task::yield_now().await;
        drop(transient);
    }

    let mut received = 0;
    while received < 50 {
        recv_within(&mut keeper, Duration::from_secs(2)).await;
        received += 1;
    }
    workers.shutdown().await.unwrap();

    let snapshot = hub.snapshot();
    assert_eq!(snapshot.connections.len(), 1);
    assert_eq!(snapshot.active_sensors.len(), 1);
    assert_eq!(snapshot.active_sensors[0].connections, vec![keeper.id()]);
}
