//! OperatingMode - global hub operating mode

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// Global operating mode of the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Ordinary operation
    #[default]
    Normal,
    /// Only the allow-listed package may use sensors
    Restricted,
    /// Device is fed injected data instead of hardware samples
    DataInjection,
    /// Injected data is replayed while hardware keeps running
    ReplayDataInjection,
    /// Injected data bypasses the device entirely
    HalBypassReplayDataInjection,
}

impl OperatingMode {
    /// Any of the three injection variants
    pub fn is_injection(self) -> bool {
        matches!(
            self,
            Self::DataInjection | Self::ReplayDataInjection | Self::HalBypassReplayDataInjection
        )
    }

    /// Whether hardware sensors are held disabled while in this mode
    pub fn suspends_hardware(self) -> bool {
        matches!(
            self,
            Self::Restricted | Self::DataInjection | Self::HalBypassReplayDataInjection
        )
    }

    /// Numeric code used for gauges
    pub fn code(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Restricted => 1,
            Self::DataInjection => 2,
            Self::ReplayDataInjection => 3,
            Self::HalBypassReplayDataInjection => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Restricted => "restricted",
            Self::DataInjection => "data_injection",
            Self::ReplayDataInjection => "replay_data_injection",
            Self::HalBypassReplayDataInjection => "hal_bypass_replay_data_injection",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = ContractError;

    /// Accepts the canonical names plus the shell aliases `enable` and `restrict`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" | "enable" => Ok(Self::Normal),
            "restricted" | "restrict" => Ok(Self::Restricted),
            "data_injection" => Ok(Self::DataInjection),
            "replay_data_injection" => Ok(Self::ReplayDataInjection),
            "hal_bypass_replay_data_injection" => Ok(Self::HalBypassReplayDataInjection),
            other => Err(ContractError::Other(format!("unknown operating mode '{other}'"))),
        }
    }
}
