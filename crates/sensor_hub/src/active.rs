//! ActiveSensorTable - per-sensor subscriber sets and pending flush FIFOs
//!
//! A record exists exactly while at least one connection subscribes to its
//! handle. Creating a record is the enable edge and deleting it is the
//! disable edge; callers turn those edges into activation calls.

use std::collections::{BTreeMap, VecDeque};

use contracts::{ConnectionId, SensorHandle};

/// Subscribers of one enabled sensor
#[derive(Debug, Clone, Default)]
pub struct ActiveSensorRecord {
    connections: Vec<ConnectionId>,
    is_virtual: bool,
    pending_flushes: VecDeque<ConnectionId>,
}

impl ActiveSensorRecord {
    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn pending_flushes(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.pending_flushes.iter().copied()
    }

    fn remove_connection(&mut self, conn: ConnectionId) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| *c != conn);
        self.pending_flushes.retain(|c| *c != conn);
        before != self.connections.len()
    }
}

/// Result of [`ActiveSensorTable::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribed {
    /// The record did not exist before (enable edge)
    pub created: bool,
    /// The connection was not subscribed before
    pub added: bool,
}

/// Result of [`ActiveSensorTable::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsubscribed {
    /// The connection was subscribed
    pub removed: bool,
    /// The record is gone (disable edge)
    pub deleted: bool,
}

#[derive(Debug, Default)]
pub struct ActiveSensorTable {
    records: BTreeMap<SensorHandle, ActiveSensorRecord>,
}

impl ActiveSensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to the record of `handle`, creating it if needed.
    ///
    /// Idempotent per connection.
    pub fn subscribe(&mut self, handle: SensorHandle, conn: ConnectionId, is_virtual: bool) -> Subscribed {
        let created = !self.records.contains_key(&handle);
        let record = self.records.entry(handle).or_insert_with(|| ActiveSensorRecord {
            is_virtual,
            ..Default::default()
        });

        let added = !record.connections.contains(&conn);
        if added {
            record.connections.push(conn);
        }
        Subscribed { created, added }
    }

    /// Remove `conn` from `handle`; deletes the record when it empties.
    pub fn unsubscribe(&mut self, handle: SensorHandle, conn: ConnectionId) -> Unsubscribed {
        let Some(record) = self.records.get_mut(&handle) else {
            return Unsubscribed {
                removed: false,
                deleted: false,
            };
        };

        let removed = record.remove_connection(conn);
        let deleted = record.is_empty();
        if deleted {
            self.records.remove(&handle);
        }
        Unsubscribed { removed, deleted }
    }

    /// Drop a record regardless of subscribers (sensor disappeared).
    pub fn remove_record(&mut self, handle: SensorHandle) -> Option<ActiveSensorRecord> {
        self.records.remove(&handle)
    }

    /// Remove `conn` everywhere. Returns the handles whose records were deleted.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Vec<SensorHandle> {
        let mut deleted = Vec::new();
        self.records.retain(|handle, record| {
            if record.remove_connection(conn) && record.is_empty() {
                deleted.push(*handle);
                return false;
            }
            true
        });
        deleted
    }

    pub fn get(&self, handle: SensorHandle) -> Option<&ActiveSensorRecord> {
        self.records.get(&handle)
    }

    pub fn is_active(&self, handle: SensorHandle) -> bool {
        self.records.contains_key(&handle)
    }

    pub fn is_subscribed(&self, handle: SensorHandle, conn: ConnectionId) -> bool {
        self.records
            .get(&handle)
            .is_some_and(|r| r.connections.contains(&conn))
    }

    pub fn handles(&self) -> impl Iterator<Item = SensorHandle> + '_ {
        self.records.keys().copied()
    }

    /// Active virtual sensors
    pub fn virtual_handles(&self) -> Vec<SensorHandle> {
        self.records
            .iter()
            .filter(|(_, r)| r.is_virtual)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Queue `conn` for the next flush-complete on `handle`
    pub fn add_pending_flush(&mut self, handle: SensorHandle, conn: ConnectionId) -> bool {
        match self.records.get_mut(&handle) {
            Some(record) => {
                record.pending_flushes.push_back(conn);
                true
            }
            None => false,
        }
    }

    /// Oldest outstanding flush requester on `handle`
    pub fn first_pending_flush(&self, handle: SensorHandle) -> Option<ConnectionId> {
        self.records
            .get(&handle)
            .and_then(|r| r.pending_flushes.front().copied())
    }

    /// Pop the oldest outstanding flush requester on `handle`
    pub fn pop_pending_flush(&mut self, handle: SensorHandle) -> Option<ConnectionId> {
        self.records
            .get_mut(&handle)
            .and_then(|r| r.pending_flushes.pop_front())
    }

    /// Forget every outstanding flush (sensors were disabled underneath)
    pub fn clear_all_pending_flushes(&mut self) {
        for record in self.records.values_mut() {
            record.pending_flushes.clear();
        }
    }
}
