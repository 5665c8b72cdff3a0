//! VirtualSensor - derived sensors fed by physical events

use crate::{SensorDescriptor, SensorEvent, SensorHandle};

/// A sensor synthesized from physical events.
///
/// The dispatch loop feeds every polled physical event through each active
/// virtual sensor; an implementation ignores events from handles it does not
/// consume and returns zero or more derived events for the rest.
pub trait VirtualSensor: Send {
    /// Descriptor of the synthesized sensor
    fn descriptor(&self) -> &SensorDescriptor;

    /// Physical handles this sensor consumes
    fn sources(&self) -> &[SensorHandle];

    /// Consume one physical event and append derived events to `out`
    fn process(&mut self, event: &SensorEvent, out: &mut Vec<SensorEvent>);

    /// Drop filter state; called on (re)activation
    fn reset(&mut self) {}
}
