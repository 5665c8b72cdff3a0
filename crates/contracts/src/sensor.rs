//! SensorDescriptor - 传感器的不可变描述
//!
//! 在发现时创建 (启动枚举或热插拔 meta 事件)，
//! 之后不再修改。

use serde::{Deserialize, Serialize};

use crate::SensorHandle;

/// 默认 (硬件) 设备所属传感器的设备 id
pub const DEFAULT_DEVICE_ID: i32 = 0;

/// 传感器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Accelerometer,
    MagneticField,
    Gyroscope,
    Light,
    Pressure,
    Proximity,
    Gravity,
    LinearAcceleration,
    RotationVector,
    StepDetector,
    StepCounter,
    SignificantMotion,
    HeartRate,
    /// 承载热插拔连接/断开通知
    DynamicSensorMeta,
    /// 承载附加帧，不缓存
    AdditionalInfo,
    /// 厂商自定义类型
    Vendor(u32),
}

impl SensorType {
    /// 该传感器类型的默认上报模式
    pub fn default_reporting_mode(self) -> ReportingMode {
        match self {
            Self::Light
            | Self::Pressure
            | Self::Proximity
            | Self::StepCounter
            | Self::HeartRate => ReportingMode::OnChange,
            Self::SignificantMotion => ReportingMode::OneShot,
            Self::StepDetector | Self::DynamicSensorMeta | Self::AdditionalInfo => {
                ReportingMode::Special
            }
            _ => ReportingMode::Continuous,
        }
    }
}

/// 上报模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingMode {
    /// 固定频率上报
    Continuous,
    /// 仅在数值变化时上报
    OnChange,
    /// 每次激活只上报一次，随后自动关闭
    OneShot,
    /// 传感器自定义触发
    Special,
}

/// 传感器的不可变描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// 进程内唯一 handle
    pub handle: SensorHandle,

    /// 名称
    pub name: String,

    /// 厂商
    #[serde(default)]
    pub vendor: String,

    /// 传感器类型
    pub sensor_type: SensorType,

    /// 上报模式
    pub reporting_mode: ReportingMode,

    /// 最小采样周期，纳秒 (0 = 无下限)
    #[serde(default)]
    pub min_delay_ns: i64,

    /// 最大采样周期，纳秒 (0 = 不限)
    #[serde(default)]
    pub max_delay_ns: i64,

    /// 访问该传感器所需权限
    #[serde(default)]
    pub required_permission: Option<String>,

    /// 所属设备 id (硬件传感器为 [`DEFAULT_DEVICE_ID`])
    #[serde(default)]
    pub device_id: i32,

    /// 唤醒型传感器：系统休眠时事件需要确认
    #[serde(default)]
    pub wake_up: bool,

    /// 由其他传感器合成，而非硬件上报
    #[serde(default)]
    pub is_virtual: bool,

    /// 热插拔传感器
    #[serde(default)]
    pub is_dynamic: bool,

    /// 仅调试用，普通列表中隐藏
    #[serde(default)]
    pub is_debug: bool,
}

impl SensorDescriptor {
    /// 按传感器类型的默认值创建描述符
    pub fn new(handle: SensorHandle, name: impl Into<String>, sensor_type: SensorType) -> Self {
        Self {
            handle,
            name: name.into(),
            vendor: String::new(),
            sensor_type,
            reporting_mode: sensor_type.default_reporting_mode(),
            min_delay_ns: 0,
            max_delay_ns: 0,
            required_permission: None,
            device_id: DEFAULT_DEVICE_ID,
            wake_up: false,
            is_virtual: false,
            is_dynamic: false,
            is_debug: false,
        }
    }

    /// 覆盖上报模式
    pub fn with_reporting_mode(mut self, mode: ReportingMode) -> Self {
        self.reporting_mode = mode;
        self
    }

    /// 标记为唤醒型传感器
    pub fn wake_up(mut self) -> Self {
        self.wake_up = true;
        self
    }

    /// 设置采样周期范围 (纳秒)
    pub fn with_delay_bounds(mut self, min_delay_ns: i64, max_delay_ns: i64) -> Self {
        self.min_delay_ns = min_delay_ns;
        self.max_delay_ns = max_delay_ns;
        self
    }

    /// 设置所需权限
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }

    /// 标记为虚拟传感器
    pub fn virtual_sensor(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// 将请求的采样周期限制在支持范围内
    ///
    /// 仅当 `max_delay_ns > 0` 时应用上限。
    pub fn clamp_period(&self, requested_ns: i64) -> i64 {
        let mut period = requested_ns;
        if self.max_delay_ns > 0 && period > self.max_delay_ns {
            period = self.max_delay_ns;
        }
        if period < self.min_delay_ns {
            period = self.min_delay_ns;
        }
        period
    }

    pub fn is_one_shot(&self) -> bool {
        self.reporting_mode == ReportingMode::OneShot
    }

    pub fn is_on_change(&self) -> bool {
        self.reporting_mode == ReportingMode::OnChange
    }

    pub fn is_proximity(&self) -> bool {
        self.sensor_type == SensorType::Proximity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reporting_modes() {
        assert_eq!(
            SensorType::Accelerometer.default_reporting_mode(),
            ReportingMode::Continuous
        );
        assert_eq!(
            SensorType::Proximity.default_reporting_mode(),
            ReportingMode::OnChange
        );
        assert_eq!(
            SensorType::SignificantMotion.default_reporting_mode(),
            ReportingMode::OneShot
        );
    }

    #[test]
    fn test_clamp_period() {
        let sensor = SensorDescriptor::new(SensorHandle::new(1), "accel", SensorType::Accelerometer)
            .with_delay_bounds(5_000_000, 200_000_000);

        assert_eq!(sensor.clamp_period(1_000), 5_000_000);
        assert_eq!(sensor.clamp_period(20_000_000), 20_000_000);
        assert_eq!(sensor.clamp_period(1_000_000_000), 200_000_000);
    }

    #[test]
    fn test_clamp_period_unbounded_max() {
        let sensor = SensorDescriptor::new(SensorHandle::new(1), "light", SensorType::Light)
            .with_delay_bounds(0, 0);
        assert_eq!(sensor.clamp_period(9_000_000_000), 9_000_000_000);
    }

    #[test]
    fn test_vendor_type_serde() {
        let json = serde_json::to_string(&SensorType::Vendor(65536)).unwrap();
        let parsed: SensorType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SensorType::Vendor(65536));

        let parsed: SensorType = serde_json::from_str("\"linear_acceleration\"").unwrap();
        assert_eq!(parsed, SensorType::LinearAcceleration);
    }
}
