//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::SensorHandle;
use std::time::Duration;
use tracing::info;

use crate::cli::RunArgs;
use crate::monitor::{Monitor, MonitorConfig};

/// Execute the `run` command
pub async fn run_monitor(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        sensors = blueprint.sensors.len(),
        virtual_sensors = blueprint.virtual_sensors.len(),
        hal = ?blueprint.simulation.hal_version,
        "Configuration loaded"
    );

    let config = MonitorConfig {
        blueprint,
        sensors: args.sensors.iter().copied().map(SensorHandle::new).collect(),
        period: Duration::from_millis(args.period_ms),
        latency: Duration::from_millis(args.latency_ms),
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        report_interval: (args.report_interval > 0)
            .then(|| Duration::from_secs(args.report_interval)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    info!("Starting sensor hub...");
    let outcome = Monitor::new(config)
        .run(shutdown_signal())
        .await
        .context("Sensor hub terminated abnormally")?;

    info!(
        events = outcome.stats.events_received,
        duration_secs = outcome.stats.duration.as_secs_f64(),
        rate = format!("{:.2}", outcome.stats.rate(outcome.stats.duration)),
        "Sensor hub stopped"
    );
    outcome.stats.print_summary();

    if args.snapshot {
        let json = serde_json::to_string_pretty(&outcome.snapshot)
            .context("Failed to serialize hub snapshot")?;
        println!("{}", json);
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed that source never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
