//! Caller identity and the permission oracle consulted by the hub

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SensorDescriptor;

/// Identity of the client issuing a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub uid: u32,
    pub pid: u32,
    pub package: String,
    #[serde(default)]
    pub attribution_tag: Option<String>,
}

impl ClientIdentity {
    pub fn new(uid: u32, pid: u32, package: impl Into<String>) -> Self {
        Self {
            uid,
            pid,
            package: package.into(),
            attribution_tag: None,
        }
    }

    pub fn with_attribution(mut self, tag: impl Into<String>) -> Self {
        self.attribution_tag = Some(tag.into());
        self
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (uid={} pid={})", self.package, self.uid, self.pid)
    }
}

/// Operation checked against the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessOperation {
    Enable,
    Configure,
    Flush,
    List,
    /// Sampling faster than the rate cap
    HighSamplingRate,
}

/// Permission / package lookups, owned by the embedding process
pub trait AccessOracle: Send + Sync {
    /// Whether `caller` may perform `operation` on `sensor`
    fn can_access(
        &self,
        sensor: &SensorDescriptor,
        operation: AccessOperation,
        caller: &ClientIdentity,
    ) -> bool;

    /// Target SDK version of the caller's package
    fn target_sdk_version(&self, caller: &ClientIdentity) -> i32;
}

/// Oracle that grants everything; used by the binary and tests
#[derive(Debug, Clone, Copy)]
pub struct AllowAll {
    pub target_sdk: i32,
}

impl Default for AllowAll {
    fn default() -> Self {
        Self { target_sdk: 34 }
    }
}

impl AccessOracle for AllowAll {
    fn can_access(&self, _: &SensorDescriptor, _: AccessOperation, _: &ClientIdentity) -> bool {
        true
    }

    fn target_sdk_version(&self, _: &ClientIdentity) -> i32 {
        self.target_sdk
    }
}
