//! Device - the hardware abstraction consumed by the hub
//!
//! The hub never looks behind this trait. `poll` is the only call expected to
//! block; everything else must return promptly.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DeviceError, OperatingMode, SensorDescriptor, SensorEvent, SensorHandle};

/// Version reported by the hardware abstraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HalVersion {
    pub major: u16,
    pub minor: u16,
}

impl HalVersion {
    /// First version with the current rotation-vector layout
    pub const V1_0: HalVersion = HalVersion::new(1, 0);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Devices up to 1.0 cannot flush; the hub answers flushes itself
    pub fn supports_flush(self) -> bool {
        self > Self::V1_0
    }

    /// Pre-1.0 rotation vectors lack the accuracy field expected by clients
    pub fn needs_rotation_vector_patch(self) -> bool {
        self < Self::V1_0
    }
}

impl fmt::Display for HalVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Backing memory of a direct channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectMemoryType {
    Ashmem,
    Gralloc,
}

/// Record layout written into a direct channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectFormat {
    SensorsEvent,
    Unknown(u32),
}

/// Shared-memory channel handed over by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectChannelDescriptor {
    pub memory_type: DirectMemoryType,
    pub format: DirectFormat,
    /// Region size in bytes
    pub size: usize,
    /// Identifies the underlying memory; two channels on the same resource are duplicates
    pub resource_id: u64,
}

/// Report rate of a direct channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLevel {
    #[default]
    Stop,
    Normal,
    Fast,
    VeryFast,
}

/// Hardware abstraction
pub trait Device: Send + Sync {
    /// Sensors present at boot
    fn sensor_list(&self) -> Vec<SensorDescriptor>;

    /// Block until events are available and append at most `max` of them to
    /// `buffer`. Returns the number appended.
    fn poll(&self, buffer: &mut Vec<SensorEvent>, max: usize) -> Result<usize, DeviceError>;

    fn enable(&self, handle: SensorHandle) -> Result<(), DeviceError>;

    fn disable(&self, handle: SensorHandle) -> Result<(), DeviceError>;

    fn batch(
        &self,
        handle: SensorHandle,
        sampling_period_ns: i64,
        max_report_latency_ns: i64,
    ) -> Result<(), DeviceError>;

    /// Request a flush-complete marker once buffered events are drained
    fn flush(&self, handle: SensorHandle) -> Result<(), DeviceError>;

    fn set_mode(&self, mode: OperatingMode) -> Result<(), DeviceError>;

    fn inject_event(&self, event: &SensorEvent) -> Result<(), DeviceError>;

    /// Returns the device-side channel id
    fn register_direct_channel(&self, channel: &DirectChannelDescriptor) -> Result<i32, DeviceError>;

    fn unregister_direct_channel(&self, channel_id: i32);

    /// Returns a report token (0 when stopping)
    fn configure_direct_report(
        &self,
        channel_id: i32,
        handle: SensorHandle,
        rate: RateLevel,
    ) -> Result<i32, DeviceError>;

    /// Whether a `DeadObject` from `poll` means the source is re-enumerating
    fn is_reconnecting(&self) -> bool {
        false
    }

    /// Re-establish the connection after `DeadObject`
    fn reconnect(&self) -> Result<(), DeviceError> {
        Err(DeviceError::unsupported("reconnect"))
    }

    /// Acknowledge that `count` wake-up events from the last poll were handled
    fn write_wake_lock_handled(&self, _count: usize) {}

    fn hal_version(&self) -> HalVersion {
        HalVersion::new(2, 1)
    }

    /// Unblock a pending `poll` so the dispatch loop can observe shutdown
    fn interrupt(&self) {}
}
