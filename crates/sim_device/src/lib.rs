//! # Simulated devices
//!
//! Two implementations of [`contracts::Device`] for running the hub without
//! hardware:
//!
//! - [`SimulatedDevice`]: one generator thread per enabled sensor feeding a
//!   shared queue behind a blocking `poll`. Used by the `sensor-hub` binary.
//! - [`ScriptedDevice`]: deterministic double. `poll` replays scripted batches
//!   and errors; every control call is recorded for assertions.

mod generator;
mod scripted;
mod simulated;

pub use generator::ValueGenerator;
pub use scripted::{DeviceCall, ScriptedDevice};
pub use simulated::SimulatedDevice;
