//! SensorRegistry - catalog of every sensor the hub can route
//!
//! Boot-time sensors come from the device, virtual sensors from config,
//! runtime sensors from software producers and dynamic sensors from hot-plug
//! meta events. A removed handle is retired and cannot be registered again
//! until explicitly released.

use std::collections::{BTreeMap, HashMap};

use contracts::{SensorDescriptor, SensorHandle};
use serde::Serialize;

use crate::error::{HubError, HubResult};

/// First handle handed out to runtime sensors
pub const RUNTIME_HANDLE_BASE: i32 = 0x5F00_0000;
/// Last handle handed out to runtime sensors
pub const RUNTIME_HANDLE_END: i32 = 0x5FFF_FFFF;

/// Where a sensor came from; decides who receives activation calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorOrigin {
    /// Enumerated by the device at boot
    Hardware,
    /// Hot-plugged through a dynamic meta event
    Dynamic,
    /// Synthesized from physical sensors
    Virtual,
    /// Software-defined, driven through a runtime callback
    Runtime,
    /// Hub-owned carrier of hot-plug notifications
    DynamicMeta,
}

impl SensorOrigin {
    /// Activation reaches the device for these origins
    pub fn is_device_backed(self) -> bool {
        matches!(self, Self::Hardware | Self::Dynamic)
    }
}

#[derive(Debug, Clone)]
pub struct SensorEntry {
    pub descriptor: SensorDescriptor,
    pub origin: SensorOrigin,
}

#[derive(Debug)]
pub struct SensorRegistry {
    sensors: BTreeMap<SensorHandle, SensorEntry>,
    retired: HashMap<SensorHandle, SensorOrigin>,
    next_runtime: i32,
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self {
            sensors: BTreeMap::new(),
            retired: HashMap::new(),
            next_runtime: RUNTIME_HANDLE_BASE,
        }
    }
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor. Fails on zero, live or retired handles.
    pub fn add(&mut self, descriptor: SensorDescriptor, origin: SensorOrigin) -> HubResult<()> {
        let handle = descriptor.handle;
        if !handle.is_valid() {
            return Err(HubError::invalid_argument("sensor handle 0 is reserved"));
        }
        if self.sensors.contains_key(&handle) {
            return Err(HubError::already_exists(format!("sensor {handle}")));
        }
        if self.retired.contains_key(&handle) {
            return Err(HubError::already_exists(format!("retired sensor handle {handle}")));
        }
        self.sensors.insert(handle, SensorEntry { descriptor, origin });
        Ok(())
    }

    /// Remove a sensor and retire its handle
    pub fn remove(&mut self, handle: SensorHandle) -> Option<SensorEntry> {
        let entry = self.sensors.remove(&handle)?;
        self.retired.insert(handle, entry.origin);
        Some(entry)
    }

    /// Allow retired handles of `origin` to be registered again.
    ///
    /// Returns how many handles were released.
    pub fn release_retired(&mut self, origin: SensorOrigin) -> usize {
        let before = self.retired.len();
        self.retired.retain(|_, o| *o != origin);
        before - self.retired.len()
    }

    pub fn get(&self, handle: SensorHandle) -> Option<&SensorDescriptor> {
        self.sensors.get(&handle).map(|e| &e.descriptor)
    }

    pub fn entry(&self, handle: SensorHandle) -> Option<&SensorEntry> {
        self.sensors.get(&handle)
    }

    pub fn origin(&self, handle: SensorHandle) -> Option<SensorOrigin> {
        self.sensors.get(&handle).map(|e| e.origin)
    }

    pub fn contains(&self, handle: SensorHandle) -> bool {
        self.sensors.contains_key(&handle)
    }

    pub fn is_wake_up(&self, handle: SensorHandle) -> bool {
        self.get(handle).is_some_and(|s| s.wake_up)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Descriptors ordered by handle
    pub fn list(&self, include_debug: bool) -> Vec<SensorDescriptor> {
        self.sensors
            .values()
            .filter(|e| include_debug || !e.descriptor.is_debug)
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn handles_with_origin(&self, origin: SensorOrigin) -> Vec<SensorHandle> {
        self.sensors
            .values()
            .filter(|e| e.origin == origin)
            .map(|e| e.descriptor.handle)
            .collect()
    }

    /// Runtime sensors registered for `device_id`
    pub fn runtime_handles_for_device(&self, device_id: i32) -> Vec<SensorHandle> {
        self.sensors
            .values()
            .filter(|e| e.origin == SensorOrigin::Runtime && e.descriptor.device_id == device_id)
            .map(|e| e.descriptor.handle)
            .collect()
    }

    /// Next free handle in the runtime range
    pub fn allocate_runtime_handle(&mut self) -> Option<SensorHandle> {
        let span = (RUNTIME_HANDLE_END - RUNTIME_HANDLE_BASE) as u32 + 1;
        for _ in 0..span {
            let candidate = SensorHandle::new(self.next_runtime);
            self.next_runtime = if self.next_runtime >= RUNTIME_HANDLE_END {
                RUNTIME_HANDLE_BASE
            } else {
                self.next_runtime + 1
            };
            if !self.sensors.contains_key(&candidate) && !self.retired.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}
