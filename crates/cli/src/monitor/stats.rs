//! Delivery statistics collected by the monitor connection.

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::{SensorDescriptor, SensorEvent, SensorHandle};
use observability::RunningStats;
use sensor_hub::ConnectionMetricsSnapshot;
use tracing::info;

/// Per-sensor counters
#[derive(Debug, Clone, Default)]
pub struct SensorStats {
    pub name: String,

    /// Data samples received
    pub events: u64,

    /// Flush-complete markers received
    pub flushes: u64,

    /// Gap between consecutive sample timestamps (milliseconds)
    pub intervals_ms: RunningStats,

    last_timestamp: Option<i64>,
}

/// Statistics from a monitor run
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    /// Wall-clock length of the run
    pub duration: Duration,

    /// Every event taken off the connection queue
    pub events_received: u64,

    /// Wake-up events acknowledged back to the hub
    pub wake_acks: u64,

    /// Subscribed sensors
    pub sensors: BTreeMap<SensorHandle, SensorStats>,

    /// Counters kept by the hub for the monitor connection
    pub connection: ConnectionMetricsSnapshot,
}

impl MonitorStats {
    /// Start tracking a subscribed sensor
    pub fn track(&mut self, sensor: &SensorDescriptor) {
        self.sensors.entry(sensor.handle).or_insert_with(|| SensorStats {
            name: sensor.name.clone(),
            ..Default::default()
        });
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn record(&mut self, event: &SensorEvent) {
        self.events_received += 1;
        let Some(sensor) = self.sensors.get_mut(&event.sensor) else {
            return;
        };
        if event.is_flush_complete() {
            sensor.flushes += 1;
            return;
        }

        sensor.events += 1;
        if let Some(previous) = sensor.last_timestamp {
            let gap_ns = event.timestamp.saturating_sub(previous);
            if gap_ns >= 0 {
                sensor.intervals_ms.push(gap_ns as f64 / 1_000_000.0);
            }
        }
        sensor.last_timestamp = Some(event.timestamp);
    }

    pub fn record_wake_ack(&mut self) {
        self.wake_acks += 1;
    }

    /// Events per second over `elapsed`
    pub fn rate(&self, elapsed: Duration) -> f64 {
        if elapsed.as_secs_f64() > 0.0 {
            self.events_received as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Drop rate reported by the hub, as a percentage
    pub fn drop_rate(&self) -> f64 {
        let total = self.connection.delivered + self.connection.dropped;
        if total > 0 {
            (self.connection.dropped as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn log_progress(&self, elapsed: Duration) {
        info!(
            elapsed_secs = elapsed.as_secs(),
            events = self.events_received,
            rate = format!("{:.1}", self.rate(elapsed)),
            wake_acks = self.wake_acks,
            "monitor progress"
        );
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     Monitor Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Events received: {}", self.events_received);
        println!("   ├─ Events/s: {:.2}", self.rate(self.duration));
        println!("   ├─ Wake-up acks: {}", self.wake_acks);
        println!("   ├─ Delivered by hub: {}", self.connection.delivered);
        println!(
            "   └─ Dropped by hub: {} ({:.2}%)",
            self.connection.dropped,
            self.drop_rate()
        );

        println!("\n📈 Sensors ({})", self.sensors.len());
        for (i, (handle, sensor)) in self.sensors.iter().enumerate() {
            let prefix = if i + 1 == self.sensors.len() { "└─" } else { "├─" };
            println!(
                "   {} {} {}: {} events, {} flushes, interval ms {}",
                prefix, handle, sensor.name, sensor.events, sensor.flushes, sensor.intervals_ms
            );
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SensorType;

    fn accel() -> SensorDescriptor {
        SensorDescriptor::new(SensorHandle::new(1), "accel", SensorType::Accelerometer)
    }

    #[test]
    fn test_intervals_between_samples() {
        let mut stats = MonitorStats::default();
        stats.track(&accel());

        for ts in [0, 10_000_000, 30_000_000] {
            stats.record(&SensorEvent::data(SensorHandle::new(1), ts, vec![0.0]));
        }
        stats.record(&SensorEvent::flush_complete(SensorHandle::new(1), 0));

        let sensor = &stats.sensors[&SensorHandle::new(1)];
        assert_eq!(sensor.events, 3);
        assert_eq!(sensor.flushes, 1);
        assert_eq!(sensor.intervals_ms.count(), 2);
        assert!((sensor.intervals_ms.mean() - 15.0).abs() < 1e-9);
        assert_eq!(stats.events_received, 4);
    }

    #[test]
    fn test_untracked_sensor_only_counts_total() {
        let mut stats = MonitorStats::default();
        stats.record(&SensorEvent::data(SensorHandle::new(9), 0, vec![0.0]));
        assert_eq!(stats.events_received, 1);
        assert!(stats.sensors.is_empty());
    }

    #[test]
    fn test_drop_rate() {
        let mut stats = MonitorStats::default();
        assert_eq!(stats.drop_rate(), 0.0);
        stats.connection.delivered = 75;
        stats.connection.dropped = 25;
        assert!((stats.drop_rate() - 25.0).abs() < 1e-9);
    }
}
