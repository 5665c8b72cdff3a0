//! DirectConnection - zero-copy channel bound to one shared memory region
//!
//! No per-event dispatch happens here; the device writes straight into the
//! channel. The hub only forwards rate configuration and stops/recovers the
//! channel when restricted mode comes and goes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use contracts::{ClientIdentity, ConnectionId, DirectChannelDescriptor, RateLevel, SensorHandle};
use tracing::debug;

use crate::hub::HubShared;
use crate::lock;

#[derive(Debug, Default)]
struct DirectState {
    configs: BTreeMap<SensorHandle, RateLevel>,
    /// Configuration saved while access is suspended
    stopped: Option<BTreeMap<SensorHandle, RateLevel>>,
    destroyed: bool,
}

pub struct DirectConnection {
    id: ConnectionId,
    identity: ClientIdentity,
    channel_id: i32,
    descriptor: DirectChannelDescriptor,
    state: Mutex<DirectState>,
}

impl DirectConnection {
    pub(crate) fn new(
        id: ConnectionId,
        identity: ClientIdentity,
        channel_id: i32,
        descriptor: DirectChannelDescriptor,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            identity,
            channel_id,
            descriptor,
            state: Mutex::new(DirectState::default()),
        })
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

    /// Channel id assigned by the device
    pub fn channel_id(&self) -> i32 {
        self.channel_id
    }

    pub fn descriptor(&self) -> &DirectChannelDescriptor {
        &self.descriptor
    }

    /// Same underlying memory resource
    pub fn is_equivalent(&self, descriptor: &DirectChannelDescriptor) -> bool {
        self.descriptor.memory_type == descriptor.memory_type
            && self.descriptor.resource_id == descriptor.resource_id
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.state).destroyed
    }

    /// Access is currently suspended (restricted mode)
    pub fn is_stopped(&self) -> bool {
        lock(&self.state).stopped.is_some()
    }

    pub fn configs(&self) -> Vec<(SensorHandle, RateLevel)> {
        lock(&self.state).configs.iter().map(|(h, r)| (*h, *r)).collect()
    }

    /// Record a configuration the device accepted
    pub(crate) fn record_config(&self, handle: SensorHandle, rate: RateLevel) {
        let mut state = lock(&self.state);
        // while stopped, changes land in the saved set so recovery replays them
        let target = match state.stopped.as_mut() {
            Some(saved) => saved,
            None => &mut state.configs,
        };
        if rate == RateLevel::Stop {
            target.remove(&handle);
        } else {
            target.insert(handle, rate);
        }
    }

    /// Stop every configured sensor, remembering the configuration.
    ///
    /// Returns the handles that must be stopped at the device.
    pub(crate) fn suspend(&self) -> Vec<SensorHandle> {
        let mut state = lock(&self.state);
        if state.stopped.is_some() {
            return Vec::new();
        }
        let saved = std::mem::take(&mut state.configs);
        let handles = saved.keys().copied().collect();
        state.stopped = Some(saved);
        debug!(connection = %self.id, channel = self.channel_id, "direct channel suspended");
        handles
    }

    /// Configuration to replay at the device after a suspension
    pub(crate) fn resume(&self) -> Vec<(SensorHandle, RateLevel)> {
        let mut state = lock(&self.state);
        match state.stopped.take() {
            Some(saved) => {
                let replay = saved.iter().map(|(h, r)| (*h, *r)).collect();
                state.configs = saved;
                debug!(connection = %self.id, channel = self.channel_id, "direct channel recovered");
                replay
            }
            None => Vec::new(),
        }
    }

    /// Mark destroyed. Returns `false` if it already was.
    pub(crate) fn mark_destroyed(&self) -> bool {
        let mut state = lock(&self.state);
        if state.destroyed {
            return false;
        }
        state.destroyed = true;
        state.configs.clear();
        state.stopped = None;
        true
    }
}

impl std::fmt::Debug for DirectConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectConnection")
            .field("id", &self.id)
            .field("package", &self.identity.package)
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

/// Client side of a direct connection; dropping it unregisters the channel.
pub struct DirectConnectionHandle {
    conn: Arc<DirectConnection>,
    hub: Weak<HubShared>,
}

impl DirectConnectionHandle {
    pub(crate) fn new(conn: Arc<DirectConnection>, hub: Weak<HubShared>) -> Self {
        Self { conn, hub }
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn channel_id(&self) -> i32 {
        self.conn.channel_id()
    }

    pub fn connection(&self) -> &Arc<DirectConnection> {
        &self.conn
    }
}

impl Drop for DirectConnectionHandle {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.destroy_direct_connection(&self.conn);
        }
    }
}
