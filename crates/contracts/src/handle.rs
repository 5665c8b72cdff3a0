//! Identifiers - sensor handles and connection ids
//!
//! Both are `Copy` newtypes so they can be stored freely in tables without
//! holding any reference to the object they name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable integer identifier for one sensor.
///
/// Handles are process-unique: a handle that has been retired is never handed
/// out again unless the registry explicitly releases it (see hot-plug reconnect).
///
/// # Examples
/// ```
/// use contracts::SensorHandle;
///
/// let handle = SensorHandle::new(0x10);
/// assert_eq!(handle.raw(), 16);
/// assert_eq!(handle.to_string(), "0x10");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorHandle(i32);

impl SensorHandle {
    /// Create a handle from its raw value.
    #[inline]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Get the raw integer value.
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Handle `0` is reserved and never names a real sensor.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<i32> for SensorHandle {
    #[inline]
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensorHandle({:#x})", self.0)
    }
}

/// Identifier of one subscriber connection.
///
/// Ids are allocated from a monotonically increasing counter and never reused,
/// so a stale id held in a table can never alias a newer connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}
