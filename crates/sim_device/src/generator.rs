//! 模拟传感器数值生成

use contracts::{ReportingMode, SensorDescriptor, SensorType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const GRAVITY: f32 = 9.806_65;

/// 为单个传感器生成合理的采样值
///
/// On-change 传感器仅在数值与上次不同时产生采样。
pub struct ValueGenerator {
    sensor_type: SensorType,
    reporting_mode: ReportingMode,
    rng: StdRng,
    noise: f32,
    tick: u64,
    last: Option<Vec<f32>>,
}

impl ValueGenerator {
    pub fn new(sensor: &SensorDescriptor, noise: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ sensor.handle.raw() as u64),
            None => StdRng::from_os_rng(),
        };
        Self {
            sensor_type: sensor.sensor_type,
            reporting_mode: sensor.reporting_mode,
            rng,
            noise: noise.abs(),
            tick: 0,
            last: None,
        }
    }

    /// 下一个采样，on-change 数值未变化时返回 `None`
    pub fn next_values(&mut self) -> Option<Vec<f32>> {
        self.tick += 1;
        let values = self.sample();

        if self.reporting_mode == ReportingMode::OnChange {
            if self.last.as_ref() == Some(&values) {
                return None;
            }
            self.last = Some(values.clone());
        }
        Some(values)
    }

    fn jitter(&mut self) -> f32 {
        if self.noise == 0.0 {
            0.0
        } else {
            self.rng.random_range(-self.noise..=self.noise)
        }
    }

    fn sample(&mut self) -> Vec<f32> {
        match self.sensor_type {
            SensorType::Accelerometer => vec![self.jitter(), self.jitter(), GRAVITY + self.jitter()],
            SensorType::Gravity => vec![0.0, 0.0, GRAVITY],
            SensorType::LinearAcceleration | SensorType::Gyroscope => {
                vec![self.jitter(), self.jitter(), self.jitter()]
            }
            SensorType::MagneticField => {
                vec![22.0 + self.jitter(), 5.0 + self.jitter(), -40.0 + self.jitter()]
            }
            SensorType::RotationVector => vec![0.0, 0.0, 0.0, 1.0, 0.0],
            // 光照和气压缓慢漂移，取整避免频繁触发 on-change
            SensorType::Light => vec![(300.0 + 50.0 * ((self.tick / 20) % 4) as f32).round()],
            SensorType::Pressure => vec![(1013.25 + self.jitter() * 10.0).round()],
            SensorType::Proximity => {
                let previous_near = self.last.as_ref().is_some_and(|v| v[0] == 0.0);
                let flip = self.rng.random_bool(0.1);
                let near = previous_near != flip;
                vec![if near { 0.0 } else { 5.0 }]
            }
            SensorType::StepCounter => vec![(self.tick / 2) as f32],
            SensorType::StepDetector | SensorType::SignificantMotion => vec![1.0],
            SensorType::HeartRate => vec![(70.0 + self.jitter() * 20.0).round()],
            SensorType::DynamicSensorMeta | SensorType::AdditionalInfo | SensorType::Vendor(_) => {
                vec![self.jitter()]
            }
        }
    }
}
