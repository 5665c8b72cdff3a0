//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{HubConfig, SensorHandle};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    hub: HubInfo,
    sensor_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sensors: Vec<SensorInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    virtual_sensors: Vec<VirtualSensorInfo>,
}

#[derive(Serialize)]
struct HubInfo {
    max_receive_events: usize,
    connection_queue_capacity: usize,
    wake_lock_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dynamic_meta_sensor_handle: Option<SensorHandle>,
    hal_version: String,
}

#[derive(Serialize)]
struct SensorInfo {
    handle: SensorHandle,
    name: String,
    sensor_type: String,
    reporting_mode: String,
    min_delay_us: i64,
    max_delay_us: i64,
    wake_up: bool,
}

#[derive(Serialize)]
struct VirtualSensorInfo {
    handle: SensorHandle,
    name: String,
    kind: String,
    sources: Vec<SensorHandle>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn hal_version(blueprint: &HubConfig) -> String {
    let (major, minor) = blueprint.simulation.hal_version;
    format!("{major}.{minor}")
}

fn build_config_info(blueprint: &HubConfig, args: &InfoArgs) -> ConfigInfo {
    let sensors = if args.sensors {
        blueprint
            .sensors
            .iter()
            .map(|s| SensorInfo {
                handle: s.handle,
                name: s.name.clone(),
                sensor_type: format!("{:?}", s.sensor_type),
                reporting_mode: format!("{:?}", s.reporting_mode()),
                min_delay_us: s.min_delay_us,
                max_delay_us: s.max_delay_us,
                wake_up: s.wake_up,
            })
            .collect()
    } else {
        Vec::new()
    };

    let virtual_sensors = blueprint
        .virtual_sensors
        .iter()
        .map(|v| VirtualSensorInfo {
            handle: v.handle,
            name: v.name.clone(),
            kind: format!("{:?}", v.kind),
            sources: v.sources.clone(),
        })
        .collect();

    let hub = &blueprint.hub;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        hub: HubInfo {
            max_receive_events: hub.max_receive_events,
            connection_queue_capacity: hub.connection_queue_capacity,
            wake_lock_timeout_ms: hub.wake_lock_timeout_ms,
            dynamic_meta_sensor_handle: hub.dynamic_meta_sensor_handle,
            hal_version: hal_version(blueprint),
        },
        sensor_count: blueprint.sensors.len(),
        sensors,
        virtual_sensors,
    }
}

fn print_config_info(blueprint: &HubConfig, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 Sensor Hub Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let hub = &blueprint.hub;
    println!("⚙️  Hub");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Poll buffer: {} events", hub.max_receive_events);
    println!("   ├─ Connection queue: {} events", hub.connection_queue_capacity);
    println!("   ├─ Wake lock timeout: {} ms", hub.wake_lock_timeout_ms);
    match hub.dynamic_meta_sensor_handle {
        Some(handle) => println!("   ├─ Dynamic meta sensor: {}", handle),
        None => println!("   ├─ Dynamic meta sensor: (none)"),
    }
    println!("   └─ HAL version: {}", hal_version(blueprint));

    println!("\n📡 Sensors ({})", blueprint.sensors.len());
    if args.sensors {
        for (i, sensor) in blueprint.sensors.iter().enumerate() {
            let prefix = if i + 1 == blueprint.sensors.len() { "└─" } else { "├─" };
            println!(
                "   {} {} {} ({:?}, {:?}{})",
                prefix,
                sensor.handle,
                sensor.name,
                sensor.sensor_type,
                sensor.reporting_mode(),
                if sensor.wake_up { ", wake-up" } else { "" }
            );
        }
    }

    if !blueprint.virtual_sensors.is_empty() {
        println!("\n🧮 Virtual Sensors ({})", blueprint.virtual_sensors.len());
        for (i, sensor) in blueprint.virtual_sensors.iter().enumerate() {
            let prefix = if i + 1 == blueprint.virtual_sensors.len() { "└─" } else { "├─" };
            let sources: Vec<String> = sensor.sources.iter().map(ToString::to_string).collect();
            println!(
                "   {} {} {} ({:?} of {})",
                prefix,
                sensor.handle,
                sensor.name,
                sensor.kind,
                sources.join(", ")
            );
        }
    }

    println!();
}
