//! ConnectionRegistry - non-owning set of live connections
//!
//! Entries are `Weak`; the client handle owns the connection. Iteration always
//! goes through [`ConnectionRegistry::snapshot`], which upgrades every entry
//! up front so callers can deliver without touching the registry again.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use contracts::ConnectionId;

use super::{DirectConnection, EventConnection};

/// Strong references to every live connection at one instant
#[derive(Debug, Default)]
pub struct ConnectionSnapshot {
    pub events: Vec<Arc<EventConnection>>,
    pub directs: Vec<Arc<DirectConnection>>,
    /// Ids whose owner went away since the previous snapshot
    pub dead: Vec<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    events: BTreeMap<ConnectionId, Weak<EventConnection>>,
    directs: BTreeMap<ConnectionId, Weak<DirectConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id was already registered
    pub fn add_event(&mut self, conn: &Arc<EventConnection>) -> bool {
        self.events
            .insert(conn.id(), Arc::downgrade(conn))
            .is_none()
    }

    pub fn remove_event(&mut self, id: ConnectionId) -> bool {
        self.events.remove(&id).is_some()
    }

    pub fn add_direct(&mut self, conn: &Arc<DirectConnection>) -> bool {
        self.directs
            .insert(conn.id(), Arc::downgrade(conn))
            .is_none()
    }

    pub fn remove_direct(&mut self, id: ConnectionId) -> bool {
        self.directs.remove(&id).is_some()
    }

    pub fn event(&self, id: ConnectionId) -> Option<Arc<EventConnection>> {
        self.events.get(&id).and_then(Weak::upgrade)
    }

    pub fn direct(&self, id: ConnectionId) -> Option<Arc<DirectConnection>> {
        self.directs.get(&id).and_then(Weak::upgrade)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.events.contains_key(&id) || self.directs.contains_key(&id)
    }

    /// Registered entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.events.len() + self.directs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.directs.is_empty()
    }

    /// Upgrade every entry; unresolvable ones are purged and reported.
    pub fn snapshot(&mut self) -> ConnectionSnapshot {
        let mut snapshot = ConnectionSnapshot::default();

        self.events.retain(|id, weak| match weak.upgrade() {
            Some(conn) => {
                snapshot.events.push(conn);
                true
            }
            None => {
                snapshot.dead.push(*id);
                false
            }
        });
        self.directs.retain(|id, weak| match weak.upgrade() {
            Some(conn) => {
                snapshot.directs.push(conn);
                true
            }
            None => {
                snapshot.dead.push(*id);
                false
            }
        });

        snapshot
    }
}
