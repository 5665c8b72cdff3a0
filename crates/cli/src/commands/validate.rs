//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{HubConfig, ReportingMode};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    sensor_count: usize,
    virtual_sensor_count: usize,
    wake_up_count: usize,
    hal_version: String,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            let (major, minor) = blueprint.simulation.hal_version;

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    sensor_count: blueprint.sensors.len(),
                    virtual_sensor_count: blueprint.virtual_sensors.len(),
                    wake_up_count: blueprint.sensors.iter().filter(|s| s.wake_up).count(),
                    hal_version: format!("{major}.{minor}"),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &HubConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sensors.is_empty() {
        warnings.push("No sensors configured - the hub will only serve runtime sensors".to_string());
    }

    if blueprint.simulation.hal_version < (1, 0) {
        warnings.push(
            "HAL version below 1.0 - flushes are emulated and rotation vectors are patched"
                .to_string(),
        );
    }

    for sensor in &blueprint.sensors {
        if sensor.wake_up && sensor.reporting_mode() == ReportingMode::Continuous {
            warnings.push(format!(
                "Sensor '{}' is a continuous wake-up sensor - the wake lock will rarely be released",
                sensor.name
            ));
        }
    }

    if blueprint.hub.dynamic_meta_sensor_handle.is_none()
        && blueprint.sensors.iter().any(|s| s.device_id != 0)
    {
        warnings.push(
            "Sensors with a non-default device id but no dynamic meta sensor configured"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Sensors: {}", summary.sensor_count);
            println!("  Virtual sensors: {}", summary.virtual_sensor_count);
            println!("  Wake-up sensors: {}", summary.wake_up_count);
            println!("  HAL version: {}", summary.hal_version);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
