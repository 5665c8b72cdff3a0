//! Per-connection delivery counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for a single event connection
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    delivered: AtomicU64,
    dropped: AtomicU64,
    wake_events: AtomicU64,
    flushes_completed: AtomicU64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wake_events(&self) -> u64 {
        self.wake_events.load(Ordering::Relaxed)
    }

    pub fn inc_wake_events(&self) {
        self.wake_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flushes_completed(&self) -> u64 {
        self.flushes_completed.load(Ordering::Relaxed)
    }

    pub fn inc_flushes_completed(&self) {
        self.flushes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionMetricsSnapshot {
        ConnectionMetricsSnapshot {
            delivered: self.delivered(),
            dropped: self.dropped(),
            wake_events: self.wake_events(),
            flushes_completed: self.flushes_completed(),
        }
    }
}

/// Point-in-time copy of [`ConnectionMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionMetricsSnapshot {
    pub delivered: u64,
    pub dropped: u64,
    pub wake_events: u64,
    pub flushes_completed: u64,
}
