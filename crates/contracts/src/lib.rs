//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the sensor hub.
//! Business crates depend only on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Event timestamps are HAL timestamps in nanoseconds (`i64`)
//! - Sampling periods and batch latencies are nanoseconds as well

mod blueprint;
mod device;
mod error;
mod event;
mod handle;
mod identity;
mod listener;
mod mode;
mod sensor;
mod synthesis;

pub use blueprint::*;
pub use device::*;
pub use error::*;
pub use event::*;
pub use handle::{ConnectionId, SensorHandle};
pub use identity::*;
pub use listener::*;
pub use mode::*;
pub use sensor::*;
pub use synthesis::VirtualSensor;
