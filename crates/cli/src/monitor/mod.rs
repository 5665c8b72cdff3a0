//! Monitor session: one subscriber connection driving the hub.

mod session;
mod stats;

pub use session::{Monitor, MonitorConfig, MonitorOutcome};
pub use stats::MonitorStats;
