//! Configuration file to running hub, driven by the simulated device.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use config_loader::{ConfigFormat, ConfigLoader};
use contracts::{HubConfig, SensorHandle, SensorType};
use sensor_hub::SensorHub;
use sim_device::SimulatedDevice;

use crate::support::{identity, recv_within, APP};

const ACCEL: SensorHandle = SensorHandle::new(1);
const MAGNITUDE: SensorHandle = SensorHandle::new(100);
const META: SensorHandle = SensorHandle::new(127);

const CONFIG: &str = r#"
[hub]
max_receive_events = 64
dynamic_meta_sensor_handle = 127

[simulation]
seed = 7

[[sensors]]
handle = 1
name = "accel"
sensor_type = "accelerometer"
min_delay_us = 5000
max_delay_us = 200000

[[sensors]]
handle = 2
name = "prox"
sensor_type = "proximity"
wake_up = true

[[virtual_sensors]]
handle = 100
name = "accel-magnitude"
sensor_type = "linear_acceleration"
sources = [1]
kind = "magnitude"
"#;

fn load() -> HubConfig {
    ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap()
}

fn build(config: &HubConfig) -> SensorHub {
    let device = Arc::new(SimulatedDevice::from_config(config));
    SensorHub::builder(device).config(config).build().unwrap()
}

#[tokio::test]
async fn test_hub_built_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let config = ConfigLoader::load_from_path(file.path()).unwrap();
    let hub = build(&config);

    assert_eq!(hub.settings().max_receive_events, 64);
    let list = hub.sensor_list(&identity(APP));
    let handles: Vec<SensorHandle> = list.iter().map(|s| s.handle).collect();
    for expected in [ACCEL, SensorHandle::new(2), MAGNITUDE, META] {
        assert!(handles.contains(&expected), "missing {expected}");
    }
    let magnitude = list.iter().find(|s| s.handle == MAGNITUDE).unwrap();
    assert!(magnitude.is_virtual);
    assert_eq!(magnitude.sensor_type, SensorType::LinearAcceleration);
    assert!(hub.dynamic_sensor_list(&identity(APP)).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simulated_samples_reach_subscribers() {
    let config = load();
    let hub = build(&config);
    let workers = hub.start();

    let mut raw = hub.create_event_connection(identity(APP), false).unwrap();
    let mut derived = hub.create_event_connection(identity(APP), false).unwrap();
    hub.enable(&raw, ACCEL, 10_000_000, 0).unwrap();
    hub.enable(&derived, MAGNITUDE, 10_000_000, 0).unwrap();

    let mut last = i64::MIN;
    for _ in 0..5 {
        let event = recv_within(&mut raw, Duration::from_secs(2)).await;
        assert_eq!(event.sensor, ACCEL);
        assert!(event.timestamp >= last);
        last = event.timestamp;
    }
    for _ in 0..3 {
        let event = recv_within(&mut derived, Duration::from_secs(2)).await;
        assert_eq!(event.sensor, MAGNITUDE);
        assert!(!event.values().unwrap_or_default().is_empty());
    }

    let snapshot = hub.snapshot();
    assert_eq!(snapshot.connections.len(), 2);
    assert!(snapshot
        .active_sensors
        .iter()
        .any(|s| s.handle == ACCEL && s.enabled_at_device));
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["mode"], "normal");

    hub.destroy_connection(&raw);
    hub.destroy_connection(&derived);
    assert!(!hub.is_active(ACCEL));
    workers.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_until_signal_stops_cleanly() {
    let hub = build(&load());
    let conn = hub.create_event_connection(identity(APP), false).unwrap();
    hub.enable(&conn, ACCEL, 5_000_000, 0).unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        hub.start()
            .run_until(tokio::time::sleep(Duration::from_millis(100))),
    )
    .await
    .unwrap();
    assert!(result.is_ok());
    assert!(conn.connection().metrics().delivered > 0);
}
