//! Subscriber connections and the registry that tracks them

mod direct;
mod event;
mod registry;

pub use direct::{DirectConnection, DirectConnectionHandle};
pub use event::{EventConnection, EventConnectionHandle, SubscriptionInfo};
pub(crate) use event::{DeliveryContext, DeliveryReport};
pub use registry::{ConnectionRegistry, ConnectionSnapshot};
