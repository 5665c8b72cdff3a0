//! 配置校验
//!
//! 校验规则：
//! - hub 调优参数在合法范围内
//! - 传感器 handle 非零，且在物理和虚拟传感器间唯一
//! - min_delay_us <= max_delay_us (max 有上限时)
//! - one-shot 传感器不设置采样周期
//! - 虚拟传感器的源存在且为物理传感器
//! - 热插拔 meta handle 不与已配置传感器冲突

use std::collections::HashSet;

use contracts::{ContractError, HubConfig, ReportingMode, VirtualSensorKind};
use ::validator::Validate;

/// 校验 HubConfig
///
/// 返回遇到的第一个错误，或 Ok(())。
pub fn validate(config: &HubConfig) -> Result<(), ContractError> {
    validate_hub_settings(config)?;
    validate_handles(config)?;
    validate_sensor_delays(config)?;
    validate_virtual_sensors(config)?;
    validate_dynamic_meta_handle(config)?;
    Ok(())
}

/// `HubSettings` 上声明的范围检查
fn validate_hub_settings(config: &HubConfig) -> Result<(), ContractError> {
    config.hub.validate().map_err(|errors| {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|name| format!("hub.{name}"))
            .unwrap_or_else(|| "hub".to_string());
        ContractError::config_validation(field, errors.to_string())
    })
}

/// handle 非零且全局唯一
fn validate_handles(config: &HubConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    let physical = config
        .sensors
        .iter()
        .enumerate()
        .map(|(idx, s)| (format!("sensors[{idx}].handle"), s.handle));
    let derived = config
        .virtual_sensors
        .iter()
        .enumerate()
        .map(|(idx, s)| (format!("virtual_sensors[{idx}].handle"), s.handle));

    for (field, handle) in physical.chain(derived) {
        if !handle.is_valid() {
            return Err(ContractError::config_validation(field, "handle must be non-zero"));
        }
        if !seen.insert(handle) {
            return Err(ContractError::config_validation(
                field,
                format!("duplicate sensor handle {handle}"),
            ));
        }
    }
    Ok(())
}

/// 采样周期范围
fn validate_sensor_delays(config: &HubConfig) -> Result<(), ContractError> {
    for (idx, sensor) in config.sensors.iter().enumerate() {
        if sensor.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sensors[{idx}].name"),
                "sensor name cannot be empty",
            ));
        }
        if sensor.min_delay_us < 0 || sensor.max_delay_us < 0 {
            return Err(ContractError::config_validation(
                format!("sensors[{idx}]"),
                "delays must be >= 0",
            ));
        }
        if sensor.max_delay_us > 0 && sensor.min_delay_us > sensor.max_delay_us {
            return Err(ContractError::config_validation(
                format!("sensors[{idx}].min_delay_us / sensors[{idx}].max_delay_us"),
                format!(
                    "min_delay_us ({}) must be <= max_delay_us ({})",
                    sensor.min_delay_us, sensor.max_delay_us
                ),
            ));
        }
        if sensor.reporting_mode() == ReportingMode::OneShot
            && (sensor.min_delay_us != 0 || sensor.max_delay_us != 0)
        {
            return Err(ContractError::config_validation(
                format!("sensors[{idx}].min_delay_us"),
                "one-shot sensors have no sampling period",
            ));
        }
    }
    Ok(())
}

/// 虚拟传感器依赖已存在的物理传感器
fn validate_virtual_sensors(config: &HubConfig) -> Result<(), ContractError> {
    let physical: HashSet<_> = config.sensors.iter().map(|s| s.handle).collect();

    for (idx, sensor) in config.virtual_sensors.iter().enumerate() {
        if sensor.sources.is_empty() {
            return Err(ContractError::config_validation(
                format!("virtual_sensors[{idx}].sources"),
                "virtual sensor needs at least one source",
            ));
        }
        if let Some(missing) = sensor.sources.iter().find(|h| !physical.contains(h)) {
            return Err(ContractError::config_validation(
                format!("virtual_sensors[{idx}].sources"),
                format!("source {missing} not found in physical sensors"),
            ));
        }
        if let VirtualSensorKind::LowPass { alpha } = sensor.kind {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(ContractError::config_validation(
                    format!("virtual_sensors[{idx}].alpha"),
                    format!("alpha must be in (0, 1], got {alpha}"),
                ));
            }
        }
    }
    Ok(())
}

/// 热插拔通知保留的 meta handle
fn validate_dynamic_meta_handle(config: &HubConfig) -> Result<(), ContractError> {
    let Some(meta) = config.hub.dynamic_meta_sensor_handle else {
        return Ok(());
    };
    if !meta.is_valid() {
        return Err(ContractError::config_validation(
            "hub.dynamic_meta_sensor_handle",
            "handle must be non-zero",
        ));
    }
    let collides = config.sensors.iter().any(|s| s.handle == meta)
        || config.virtual_sensors.iter().any(|s| s.handle == meta);
    if collides {
        return Err(ContractError::config_validation(
            "hub.dynamic_meta_sensor_handle",
            format!("handle {meta} is already used by a configured sensor"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        HubSettings, SensorConfig, SensorHandle, SensorType, SimulationConfig,
        VirtualSensorConfig,
    };

    fn sensor(handle: i32, sensor_type: SensorType) -> SensorConfig {
        SensorConfig {
            handle: SensorHandle::new(handle),
            name: format!("sensor-{handle}"),
            vendor: String::new(),
            sensor_type,
            reporting_mode: None,
            min_delay_us: 0,
            max_delay_us: 0,
            wake_up: false,
            required_permission: None,
            device_id: 0,
            debug: false,
        }
    }

    fn minimal_config() -> HubConfig {
        HubConfig {
            version: Default::default(),
            hub: HubSettings::default(),
            sensors: vec![
                sensor(1, SensorType::Accelerometer),
                sensor(2, SensorType::Proximity),
            ],
            virtual_sensors: vec![VirtualSensorConfig {
                handle: SensorHandle::new(100),
                name: "magnitude".into(),
                sensor_type: SensorType::LinearAcceleration,
                sources: vec![SensorHandle::new(1)],
                kind: VirtualSensorKind::Magnitude,
                min_delay_us: 0,
            }],
            simulation: SimulationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_duplicate_handle_across_virtual() {
        let mut config = minimal_config();
        config.virtual_sensors[0].handle = SensorHandle::new(2);
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("duplicate sensor handle"), "got: {err}");
    }

    #[test]
    fn test_zero_handle() {
        let mut config = minimal_config();
        config.sensors[0].handle = SensorHandle::new(0);
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("non-zero"), "got: {err}");
    }

    #[test]
    fn test_invalid_delay_range() {
        let mut config = minimal_config();
        config.sensors[0].min_delay_us = 50_000;
        config.sensors[0].max_delay_us = 10_000;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("min_delay_us"), "got: {err}");
    }

    #[test]
    fn test_one_shot_with_period() {
        let mut config = minimal_config();
        let mut motion = sensor(3, SensorType::SignificantMotion);
        motion.min_delay_us = 1000;
        config.sensors.push(motion);
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("one-shot"), "got: {err}");
    }

    #[test]
    fn test_virtual_source_missing() {
        let mut config = minimal_config();
        config.virtual_sensors[0].sources = vec![SensorHandle::new(42)];
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("not found"), "got: {err}");
    }

    #[test]
    fn test_low_pass_alpha_range() {
        let mut config = minimal_config();
        config.virtual_sensors[0].kind = VirtualSensorKind::LowPass { alpha: 1.5 };
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("alpha"), "got: {err}");
    }

    #[test]
    fn test_meta_handle_collision() {
        let mut config = minimal_config();
        config.hub.dynamic_meta_sensor_handle = Some(SensorHandle::new(1));
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("dynamic_meta_sensor_handle"), "got: {err}");
    }

    #[test]
    fn test_hub_settings_range() {
        let mut config = minimal_config();
        config.hub.max_receive_events = 4;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("hub.max_receive_events"), "got: {err}");
    }
}
