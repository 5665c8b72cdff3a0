//! # Sensor Hub
//!
//! Event routing and connection management around one sensor device.
//!
//! ## Architecture
//! ```text
//! Device::poll ──► DispatchLoop ──┐
//!                                 ├──► ActiveSensorTable + ConnectionRegistry ──► EventConnection queues
//! runtime producers ──► RuntimeEventLoop ──┘
//!
//! clients ──► SensorHub (enable / disable / flush / change_mode) ──► Device
//! ```
//!
//! ## Key Types
//! - [`SensorHub`] / [`SensorHubBuilder`]: client-facing facade
//! - [`HubWorkers`]: dispatch loop, runtime loop and wake lock watchdog
//! - [`EventConnectionHandle`] / [`DirectConnectionHandle`]: client-owned connections
//! - [`ModeController`]: operating mode state machine
//!
//! ## Example
//! ```ignore
//! let hub = SensorHub::builder(device).config(&config).build()?;
//! let workers = hub.start();
//! let mut conn = hub.create_event_connection(identity, false)?;
//! hub.enable(&conn, handle, 20_000_000, 0)?;
//! while let Some(event) = conn.recv().await { /* ... */ }
//! workers.shutdown().await?;
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod active;
mod connection;
mod dispatch;
mod error;
mod history;
mod hub;
mod metrics;
mod mode;
mod proximity;
mod recent;
mod runtime;
mod sensor_list;
mod virtual_sensor;
mod wake_lock;
mod workers;

pub use active::{ActiveSensorRecord, ActiveSensorTable, Subscribed, Unsubscribed};
pub use connection::{
    ConnectionRegistry, ConnectionSnapshot, DirectConnection, DirectConnectionHandle,
    EventConnection, EventConnectionHandle, SubscriptionInfo,
};
pub use error::{DispatchError, HubError, HubResult, Status};
pub use history::RegistrationRecord;
pub use hub::{
    ActiveSensorSummary, ConnectionSummary, DirectConnectionSummary, HubSnapshot, SensorHub,
    SensorHubBuilder,
};
pub use metrics::{ConnectionMetrics, ConnectionMetricsSnapshot};
pub use mode::{ModeController, ModeTransition};
pub use recent::RecentEventCache;
pub use sensor_list::{SensorEntry, SensorOrigin, SensorRegistry, RUNTIME_HANDLE_BASE, RUNTIME_HANDLE_END};
pub use virtual_sensor::{build_virtual_sensor, LowPassSensor, MagnitudeSensor};
pub use wake_lock::WakeLockCoordinator;
pub use workers::HubWorkers;

/// Lock a mutex, recovering the data if a holder panicked.
///
/// Every critical section is plain in-memory mutation, so the state is
/// consistent even after a panic elsewhere.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
