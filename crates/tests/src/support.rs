//! Shared fixtures: a small sensor list and hub constructors.

use std::sync::Arc;
use std::time::Duration;

use contracts::{
    ClientIdentity, HubSettings, ReportingMode, SensorDescriptor, SensorEvent, SensorHandle,
    SensorType,
};
use sensor_hub::{EventConnectionHandle, SensorHub};
use sim_device::ScriptedDevice;

pub const ACCEL: SensorHandle = SensorHandle::new(1);
pub const GYRO: SensorHandle = SensorHandle::new(2);
pub const LIGHT: SensorHandle = SensorHandle::new(5);
pub const PROX: SensorHandle = SensorHandle::new(6);
pub const TILT: SensorHandle = SensorHandle::new(7);
pub const SIG_MOTION: SensorHandle = SensorHandle::new(8);

pub const META: SensorHandle = SensorHandle::new(0x100);
pub const MAG: SensorHandle = SensorHandle::new(0x200);

pub const APP: &str = "com.example.app";
pub const TOOL: &str = "com.example.tool";

pub fn sensors() -> Vec<SensorDescriptor> {
    vec![
        SensorDescriptor::new(ACCEL, "accel", SensorType::Accelerometer)
            .with_delay_bounds(1_000_000, 1_000_000_000),
        SensorDescriptor::new(GYRO, "gyro", SensorType::Gyroscope)
            .with_delay_bounds(1_000_000, 1_000_000_000),
        SensorDescriptor::new(LIGHT, "light", SensorType::Light),
        SensorDescriptor::new(PROX, "proximity", SensorType::Proximity).wake_up(),
        SensorDescriptor::new(TILT, "tilt", SensorType::Vendor(1))
            .with_reporting_mode(ReportingMode::OnChange)
            .wake_up(),
        SensorDescriptor::new(SIG_MOTION, "significant motion", SensorType::SignificantMotion)
            .wake_up(),
    ]
}

pub fn device() -> Arc<ScriptedDevice> {
    Arc::new(ScriptedDevice::new(sensors()))
}

pub fn hub(device: &Arc<ScriptedDevice>) -> SensorHub {
    hub_with(device, HubSettings::default())
}

pub fn hub_with(device: &Arc<ScriptedDevice>, settings: HubSettings) -> SensorHub {
    SensorHub::builder(device.clone())
        .settings(settings)
        .build()
        .unwrap()
}

pub fn identity(package: &str) -> ClientIdentity {
    ClientIdentity::new(10_000, 42, package)
}

pub fn connect(hub: &SensorHub, package: &str) -> EventConnectionHandle {
    hub.create_event_connection(identity(package), false).unwrap()
}

pub fn data(handle: SensorHandle, timestamp: i64) -> SensorEvent {
    SensorEvent::data(handle, timestamp, vec![timestamp as f32])
}

pub fn timestamps(events: &[SensorEvent]) -> Vec<i64> {
    events.iter().map(|e| e.timestamp).collect()
}

/// Receive one event or fail after `timeout`
pub async fn recv_within(conn: &mut EventConnectionHandle, timeout: Duration) -> SensorEvent {
    tokio::time::timeout(timeout, conn.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("connection closed")
}
