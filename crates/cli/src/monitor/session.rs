//! Monitor session - builds the hub, subscribes, collects statistics.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{ClientIdentity, HubConfig, SensorDescriptor, SensorHandle, SensorType};
use sensor_hub::{HubSnapshot, HubWorkers, SensorHub};
use sim_device::SimulatedDevice;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::MonitorStats;
use crate::error::CliError;

const MONITOR_PACKAGE: &str = "sensor-hub-cli";

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// The hub blueprint
    pub blueprint: HubConfig,

    /// Handles to subscribe (empty = every listed sensor)
    pub sensors: Vec<SensorHandle>,

    /// Requested sampling period
    pub period: Duration,

    /// Requested batch latency
    pub latency: Duration,

    /// Run length (None = until the shutdown signal)
    pub duration: Option<Duration>,

    /// Progress report interval (None = silent)
    pub report_interval: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// What a finished session leaves behind
#[derive(Debug)]
pub struct MonitorOutcome {
    pub stats: MonitorStats,
    pub snapshot: HubSnapshot,
}

/// Runs the hub against a simulated device with one monitor connection
pub struct Monitor {
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves, the duration elapses or the hub fails
    pub async fn run<F>(self, shutdown: F) -> Result<MonitorOutcome, CliError>
    where
        F: Future<Output = ()>,
    {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let device = Arc::new(SimulatedDevice::from_config(&self.config.blueprint));
        let hub = SensorHub::builder(device)
            .config(&self.config.blueprint)
            .build()?;
        let workers = hub.start();

        let session = self.drive(&hub, &workers, shutdown).await;
        let stopped = workers.shutdown().await;

        let outcome = session?;
        stopped?;
        Ok(outcome)
    }

    async fn drive<F>(
        &self,
        hub: &SensorHub,
        workers: &HubWorkers,
        shutdown: F,
    ) -> Result<MonitorOutcome, CliError>
    where
        F: Future<Output = ()>,
    {
        let identity = ClientIdentity::new(0, std::process::id(), MONITOR_PACKAGE);
        let mut conn = hub.create_event_connection(identity.clone(), false)?;

        let period_ns = duration_ns(self.config.period);
        let latency_ns = duration_ns(self.config.latency);
        let mut stats = MonitorStats::default();
        for sensor in self.select_sensors(hub, &identity)? {
            match hub.enable(&conn, sensor.handle, period_ns, latency_ns) {
                Ok(()) => {
                    info!(handle = %sensor.handle, name = %sensor.name, "subscribed");
                    stats.track(&sensor);
                }
                Err(e) => warn!(handle = %sensor.handle, error = %e, "subscription rejected"),
            }
        }
        if stats.sensor_count() == 0 {
            return Err(CliError::no_sensors("every subscription was rejected"));
        }

        let deadline = async {
            match self.config.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        let mut ticker =
            tokio::time::interval(self.config.report_interval.unwrap_or(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let start = Instant::now();
        loop {
            tokio::select! {
                event = conn.recv() => {
                    let Some(event) = event else {
                        warn!("monitor connection closed");
                        break;
                    };
                    if event.wake_up_ack_required {
                        hub.acknowledge_wake_events(&conn, 1);
                        stats.record_wake_ack();
                    }
                    stats.record(&event);
                }
                _ = ticker.tick() => {
                    if workers.is_finished() {
                        warn!("dispatch loop stopped, ending session");
                        break;
                    }
                    if self.config.report_interval.is_some() {
                        stats.log_progress(start.elapsed());
                    }
                }
                _ = &mut deadline => {
                    info!("run duration reached");
                    break;
                }
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping hub...");
                    break;
                }
            }
        }

        stats.duration = start.elapsed();
        stats.connection = conn.connection().metrics();
        let snapshot = hub.snapshot();
        hub.destroy_connection(&conn);
        Ok(MonitorOutcome { stats, snapshot })
    }

    fn select_sensors(
        &self,
        hub: &SensorHub,
        identity: &ClientIdentity,
    ) -> Result<Vec<SensorDescriptor>, CliError> {
        let listed = hub
            .sensor_list(identity)
            .into_iter()
            .filter(|s| s.sensor_type != SensorType::DynamicSensorMeta);

        let selected: Vec<SensorDescriptor> = if self.config.sensors.is_empty() {
            listed.collect()
        } else {
            for handle in &self.config.sensors {
                if !hub.debug_sensor_list().iter().any(|s| s.handle == *handle) {
                    warn!(handle = %handle, "requested sensor is not configured");
                }
            }
            listed
                .filter(|s| self.config.sensors.contains(&s.handle))
                .collect()
        };

        if selected.is_empty() {
            return Err(CliError::no_sensors("no configured sensor matches the request"));
        }
        Ok(selected)
    }
}

fn duration_ns(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SensorConfig;

    fn blueprint() -> HubConfig {
        HubConfig {
            sensors: vec![SensorConfig {
                handle: SensorHandle::new(1),
                name: "accel".to_string(),
                vendor: String::new(),
                sensor_type: SensorType::Accelerometer,
                reporting_mode: None,
                min_delay_us: 1000,
                max_delay_us: 0,
                wake_up: false,
                required_permission: None,
                device_id: 0,
                debug: false,
            }],
            ..Default::default()
        }
    }

    fn config(sensors: Vec<SensorHandle>) -> MonitorConfig {
        MonitorConfig {
            blueprint: blueprint(),
            sensors,
            period: Duration::from_millis(5),
            latency: Duration::ZERO,
            duration: Some(Duration::from_millis(200)),
            report_interval: None,
            metrics_port: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_receives_simulated_events() {
        let outcome = Monitor::new(config(Vec::new()))
            .run(std::future::pending())
            .await
            .unwrap();

        assert!(outcome.stats.events_received > 0);
        assert_eq!(outcome.stats.sensor_count(), 1);
        assert_eq!(outcome.snapshot.active_sensors.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_sensor_is_rejected() {
        let result = Monitor::new(config(vec![SensorHandle::new(42)]))
            .run(std::future::pending())
            .await;
        assert!(matches!(result, Err(CliError::NoSensors { .. })));
    }
}
