//! HubConfig - Config Loader 输出
//!
//! 描述 hub 调优参数、启动时枚举的传感器列表、
//! 基于其构建的虚拟传感器以及二进制使用的模拟设备。

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{ReportingMode, SensorDescriptor, SensorHandle, SensorType, DEFAULT_DEVICE_ID};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的 hub 蓝图
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub version: ConfigVersion,

    /// Hub 调优参数
    #[serde(default)]
    pub hub: HubSettings,

    /// 启动时枚举的物理传感器
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,

    /// 由物理传感器合成的虚拟传感器
    #[serde(default)]
    pub virtual_sensors: Vec<VirtualSensorConfig>,

    /// 模拟设备参数
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Hub 调优参数
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HubSettings {
    /// 单次 poll 缓冲区容量 (物理 + 合成事件)
    #[validate(range(min = 16, max = 65536))]
    pub max_receive_events: usize,

    /// runtime 循环每次唤醒最多取出的事件数
    #[validate(range(min = 1, max = 65536))]
    pub runtime_queue_capacity: usize,

    /// 每个连接的投递队列深度
    #[validate(range(min = 1, max = 1048576))]
    pub connection_queue_capacity: usize,

    /// 超过该时长未确认则强制释放 wake lock
    #[validate(range(min = 100, max = 600000))]
    pub wake_lock_timeout_ms: u64,

    /// 诊断用的 enable/disable 请求记录条数
    #[validate(range(min = 1, max = 10000))]
    pub registration_history: usize,

    /// 承载热插拔通知的传感器 handle
    pub dynamic_meta_sensor_handle: Option<SensorHandle>,

    /// 无高采样率权限调用方的采样周期上限
    #[validate(range(min = 0))]
    pub rate_cap_period_ns: i64,

    /// 目标 SDK 版本不低于该值的调用方受上限约束
    pub rate_cap_min_target_sdk: i32,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            max_receive_events: 256,
            runtime_queue_capacity: 256,
            connection_queue_capacity: 512,
            wake_lock_timeout_ms: 5000,
            registration_history: 50,
            dynamic_meta_sensor_handle: None,
            rate_cap_period_ns: 5_000_000,
            rate_cap_min_target_sdk: 31,
        }
    }
}

/// 单个物理传感器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub handle: SensorHandle,

    pub name: String,

    #[serde(default)]
    pub vendor: String,

    pub sensor_type: SensorType,

    /// 默认为该类型的自然上报模式
    #[serde(default)]
    pub reporting_mode: Option<ReportingMode>,

    /// 最小采样周期 (微秒)
    #[serde(default)]
    pub min_delay_us: i64,

    /// 最大采样周期 (微秒，0 = 不限)
    #[serde(default)]
    pub max_delay_us: i64,

    #[serde(default)]
    pub wake_up: bool,

    #[serde(default)]
    pub required_permission: Option<String>,

    #[serde(default)]
    pub device_id: i32,

    #[serde(default)]
    pub debug: bool,
}

impl SensorConfig {
    pub fn reporting_mode(&self) -> ReportingMode {
        self.reporting_mode
            .unwrap_or_else(|| self.sensor_type.default_reporting_mode())
    }

    /// 构建不可变描述符
    pub fn to_descriptor(&self) -> SensorDescriptor {
        SensorDescriptor {
            handle: self.handle,
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            sensor_type: self.sensor_type,
            reporting_mode: self.reporting_mode(),
            min_delay_ns: self.min_delay_us.saturating_mul(1000),
            max_delay_ns: self.max_delay_us.saturating_mul(1000),
            required_permission: self.required_permission.clone(),
            device_id: self.device_id,
            wake_up: self.wake_up,
            is_virtual: false,
            is_dynamic: false,
            is_debug: self.debug,
        }
    }
}

/// 虚拟传感器的合成函数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VirtualSensorKind {
    /// 源数据的欧几里得范数
    Magnitude,
    /// 对源数据做一阶低通滤波
    LowPass { alpha: f32 },
}

/// 单个虚拟传感器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualSensorConfig {
    pub handle: SensorHandle,

    pub name: String,

    pub sensor_type: SensorType,

    /// 依赖的物理传感器
    pub sources: Vec<SensorHandle>,

    #[serde(flatten)]
    pub kind: VirtualSensorKind,

    /// 最小采样周期 (微秒)
    #[serde(default)]
    pub min_delay_us: i64,
}

impl VirtualSensorConfig {
    pub fn to_descriptor(&self) -> SensorDescriptor {
        SensorDescriptor::new(self.handle, self.name.clone(), self.sensor_type)
            .with_reporting_mode(ReportingMode::Continuous)
            .with_delay_bounds(self.min_delay_us.saturating_mul(1000), 0)
            .virtual_sensor()
    }
}

/// 模拟设备参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// 上报的 HAL 版本 (major, minor)
    pub hal_version: (u16, u16),

    /// 生成数据叠加噪声的峰值幅度
    pub noise_amplitude: f32,

    /// 固定 RNG 种子 (可复现运行)
    pub seed: Option<u64>,

    /// 硬件传感器上报的设备 id
    pub device_id: i32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            hal_version: (2, 1),
            noise_amplitude: 0.05,
            seed: None,
            device_id: DEFAULT_DEVICE_ID,
        }
    }
}

impl HubConfig {
    /// 所有已配置物理和虚拟传感器的描述符
    pub fn descriptors(&self) -> Vec<SensorDescriptor> {
        self.sensors
            .iter()
            .map(SensorConfig::to_descriptor)
            .chain(self.virtual_sensors.iter().map(VirtualSensorConfig::to_descriptor))
            .collect()
    }
}
