//! SensorEvent - the unit flowing from the device to subscribers
//!
//! Data samples, flush-complete markers and hot-plug notifications share one
//! type so a single batch can be sorted and delivered in timestamp order.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{SensorDescriptor, SensorHandle};

/// One routed sensor event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    /// Routing handle. For flush-complete markers this is the flushed sensor;
    /// for hot-plug notifications it is the dynamic-meta sensor.
    pub sensor: SensorHandle,

    /// HAL timestamp (nanoseconds)
    pub timestamp: i64,

    /// Set on delivery when the subscriber must acknowledge this event
    #[serde(default)]
    pub wake_up_ack_required: bool,

    /// Event content
    pub payload: EventPayload,
}

/// Event content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Sample values (layout defined by the sensor type)
    Values(Vec<f32>),

    /// All events buffered before a flush request have been delivered
    FlushComplete,

    /// A hot-plug sensor connected or disconnected
    DynamicSensorMeta(DynamicSensorMeta),

    /// Auxiliary frame, opaque to the hub
    AdditionalInfo(Bytes),
}

/// Hot-plug notification content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicSensorMeta {
    /// `true` on connect, `false` on disconnect
    pub connected: bool,

    /// Handle of the sensor that (dis)connected
    pub handle: SensorHandle,

    /// Full descriptor, present on connect
    #[serde(default)]
    pub descriptor: Option<SensorDescriptor>,
}

impl SensorEvent {
    /// Create a data sample
    pub fn data(sensor: SensorHandle, timestamp: i64, values: Vec<f32>) -> Self {
        Self {
            sensor,
            timestamp,
            wake_up_ack_required: false,
            payload: EventPayload::Values(values),
        }
    }

    /// Create a flush-complete marker for `sensor`
    pub fn flush_complete(sensor: SensorHandle, timestamp: i64) -> Self {
        Self {
            sensor,
            timestamp,
            wake_up_ack_required: false,
            payload: EventPayload::FlushComplete,
        }
    }

    /// Create a hot-plug connect notification
    pub fn dynamic_connected(
        meta_sensor: SensorHandle,
        timestamp: i64,
        descriptor: SensorDescriptor,
    ) -> Self {
        Self {
            sensor: meta_sensor,
            timestamp,
            wake_up_ack_required: false,
            payload: EventPayload::DynamicSensorMeta(DynamicSensorMeta {
                connected: true,
                handle: descriptor.handle,
                descriptor: Some(descriptor),
            }),
        }
    }

    /// Create a hot-plug disconnect notification
    pub fn dynamic_disconnected(
        meta_sensor: SensorHandle,
        timestamp: i64,
        handle: SensorHandle,
    ) -> Self {
        Self {
            sensor: meta_sensor,
            timestamp,
            wake_up_ack_required: false,
            payload: EventPayload::DynamicSensorMeta(DynamicSensorMeta {
                connected: false,
                handle,
                descriptor: None,
            }),
        }
    }

    pub fn is_flush_complete(&self) -> bool {
        matches!(self.payload, EventPayload::FlushComplete)
    }

    pub fn dynamic_meta(&self) -> Option<&DynamicSensorMeta> {
        match &self.payload {
            EventPayload::DynamicSensorMeta(meta) => Some(meta),
            _ => None,
        }
    }

    /// Whether this event may be stored in the last-value cache
    pub fn is_cacheable(&self) -> bool {
        matches!(self.payload, EventPayload::Values(_))
    }

    pub fn values(&self) -> Option<&[f32]> {
        match &self.payload {
            EventPayload::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn values_mut(&mut self) -> Option<&mut Vec<f32>> {
        match &mut self.payload {
            EventPayload::Values(values) => Some(values),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SensorType;

    #[test]
    fn test_only_values_are_cacheable() {
        let handle = SensorHandle::new(3);
        assert!(SensorEvent::data(handle, 1, vec![1.0]).is_cacheable());
        assert!(!SensorEvent::flush_complete(handle, 1).is_cacheable());
        assert!(!SensorEvent::dynamic_disconnected(handle, 1, SensorHandle::new(9)).is_cacheable());
    }

    #[test]
    fn test_dynamic_connected_carries_descriptor_handle() {
        let descriptor =
            SensorDescriptor::new(SensorHandle::new(0x40), "ext-hr", SensorType::HeartRate);
        let event = SensorEvent::dynamic_connected(SensorHandle::new(0x7f), 10, descriptor);

        let meta = event.dynamic_meta().unwrap();
        assert!(meta.connected);
        assert_eq!(meta.handle, SensorHandle::new(0x40));
        assert_eq!(event.sensor, SensorHandle::new(0x7f));
    }
}
