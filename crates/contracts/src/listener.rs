//! Callback traits implemented by hub clients

use crate::SensorHandle;

/// Notified whenever any proximity sensor becomes active or inactive
pub trait ProximityActiveListener: Send + Sync {
    fn on_proximity_active(&self, is_active: bool);
}

/// Receives activation changes for software-defined sensors.
///
/// Runtime sensors are not backed by the device, so the hub forwards
/// enable/disable/batch decisions here instead.
pub trait RuntimeSensorCallback: Send + Sync {
    fn on_configuration_changed(
        &self,
        handle: SensorHandle,
        enabled: bool,
        sampling_period_ns: i64,
        batch_latency_ns: i64,
    );
}
