//! Built-in virtual sensors
//!
//! Each consumes samples from its physical sources and emits derived samples
//! carrying its own handle and the source timestamp.

use contracts::{
    SensorDescriptor, SensorEvent, SensorHandle, VirtualSensor, VirtualSensorConfig,
    VirtualSensorKind,
};
use nalgebra::DVector;

/// Euclidean norm of each source sample
#[derive(Debug)]
pub struct MagnitudeSensor {
    descriptor: SensorDescriptor,
    sources: Vec<SensorHandle>,
}

impl MagnitudeSensor {
    pub fn new(descriptor: SensorDescriptor, sources: Vec<SensorHandle>) -> Self {
        Self { descriptor, sources }
    }
}

impl VirtualSensor for MagnitudeSensor {
    fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    fn sources(&self) -> &[SensorHandle] {
        &self.sources
    }

    fn process(&mut self, event: &SensorEvent, out: &mut Vec<SensorEvent>) {
        if !self.sources.contains(&event.sensor) {
            return;
        }
        let Some(values) = event.values() else {
            return;
        };
        let norm = DVector::from_column_slice(values).norm();
        out.push(SensorEvent::data(self.descriptor.handle, event.timestamp, vec![norm]));
    }
}

/// First-order low-pass filter: `y += alpha * (x - y)`
#[derive(Debug)]
pub struct LowPassSensor {
    descriptor: SensorDescriptor,
    sources: Vec<SensorHandle>,
    alpha: f32,
    state: Option<DVector<f32>>,
}

impl LowPassSensor {
    pub fn new(descriptor: SensorDescriptor, sources: Vec<SensorHandle>, alpha: f32) -> Self {
        Self {
            descriptor,
            sources,
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            state: None,
        }
    }
}

impl VirtualSensor for LowPassSensor {
    fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    fn sources(&self) -> &[SensorHandle] {
        &self.sources
    }

    fn process(&mut self, event: &SensorEvent, out: &mut Vec<SensorEvent>) {
        if !self.sources.contains(&event.sensor) {
            return;
        }
        let Some(values) = event.values() else {
            return;
        };
        let input = DVector::from_column_slice(values);

        let filtered = match self.state.take() {
            Some(prev) if prev.len() == input.len() => &prev + (&input - &prev) * self.alpha,
            // first sample, or the source changed its layout
            _ => input,
        };
        out.push(SensorEvent::data(
            self.descriptor.handle,
            event.timestamp,
            filtered.iter().copied().collect(),
        ));
        self.state = Some(filtered);
    }

    fn reset(&mut self) {
        self.state = None;
    }
}

/// Build the virtual sensor described by `config`
pub fn build_virtual_sensor(config: &VirtualSensorConfig) -> Box<dyn VirtualSensor> {
    let descriptor = config.to_descriptor();
    let sources = config.sources.clone();
    match config.kind {
        VirtualSensorKind::Magnitude => Box::new(MagnitudeSensor::new(descriptor, sources)),
        VirtualSensorKind::LowPass { alpha } => {
            Box::new(LowPassSensor::new(descriptor, sources, alpha))
        }
    }
}
