//! Bounded log of recent enable/disable requests for diagnostics

use std::fmt;

use chrono::{DateTime, Utc};
use contracts::SensorHandle;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;

use crate::error::Status;

/// One enable or disable request as the hub saw it
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRecord {
    pub at: DateTime<Utc>,
    pub handle: SensorHandle,
    pub package: String,
    pub sampling_period_ns: i64,
    pub max_report_latency_ns: i64,
    pub activate: bool,
    pub status: Status,
}

/// Oldest records are overwritten once full
pub struct RegistrationHistory {
    records: HeapRb<RegistrationRecord>,
}

impl fmt::Debug for RegistrationHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationHistory")
            .field("len", &self.records.occupied_len())
            .finish()
    }
}

impl RegistrationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HeapRb::new(capacity.max(1)),
        }
    }

    pub fn push(&mut self, record: RegistrationRecord) {
        let _ = self.records.push_overwrite(record);
    }

    /// Records oldest first
    pub fn records(&self) -> Vec<RegistrationRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
