//! Last-event cache
//!
//! Keeps the most recent sample per handle so a connection subscribing to an
//! already running on-change sensor gets the current value immediately. A
//! stale entry predates the current activation and is never handed out.

use std::collections::HashMap;

use contracts::{SensorEvent, SensorHandle};

#[derive(Debug, Clone)]
struct RecentEntry {
    event: SensorEvent,
    stale: bool,
    count: u64,
}

#[derive(Debug, Default)]
pub struct RecentEventCache {
    entries: HashMap<SensorHandle, RecentEntry>,
}

impl RecentEventCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store every cacheable event; later events win
    pub fn record(&mut self, events: &[SensorEvent]) {
        for event in events.iter().filter(|e| e.is_cacheable()) {
            let entry = self
                .entries
                .entry(event.sensor)
                .or_insert_with(|| RecentEntry {
                    event: event.clone(),
                    stale: false,
                    count: 0,
                });
            entry.event = event.clone();
            entry.event.wake_up_ack_required = false;
            entry.stale = false;
            entry.count += 1;
        }
    }

    /// The cached value belongs to a previous activation
    pub fn mark_stale(&mut self, handle: SensorHandle) {
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.stale = true;
        }
    }

    /// Cached value if it belongs to the current activation
    pub fn current(&self, handle: SensorHandle) -> Option<&SensorEvent> {
        self.entries
            .get(&handle)
            .filter(|e| !e.stale)
            .map(|e| &e.event)
    }

    /// Cached value regardless of staleness
    pub fn last(&self, handle: SensorHandle) -> Option<&SensorEvent> {
        self.entries.get(&handle).map(|e| &e.event)
    }

    /// Number of events recorded for `handle` since it first appeared
    pub fn count(&self, handle: SensorHandle) -> u64 {
        self.entries.get(&handle).map_or(0, |e| e.count)
    }

    pub fn remove(&mut self, handle: SensorHandle) {
        self.entries.remove(&handle);
    }
}
