//! Sensor hub 指标记录模块
//!
//! 对 `metrics` facade 的薄封装，保证各 crate 使用相同的指标名。
//! 未安装 recorder 时这些调用为空操作。

use metrics::{counter, gauge, histogram};

/// 记录一次 device poll 返回的事件数
pub fn record_events_polled(count: usize) {
    counter!("sensor_hub_events_polled_total").increment(count as u64);
    histogram!("sensor_hub_dispatch_batch_size").record(count as f64);
}

/// 记录进入连接队列的事件
pub fn record_events_delivered(count: usize) {
    if count > 0 {
        counter!("sensor_hub_events_delivered_total").increment(count as u64);
    }
}

/// 记录投递途中被丢弃的事件
///
/// `reason` 取值：`queue_full`, `closed`, `synthesis_overflow`.
pub fn record_events_dropped(reason: &'static str, count: usize) {
    if count > 0 {
        counter!("sensor_hub_events_dropped_total", "reason" => reason).increment(count as u64);
    }
}

/// 记录虚拟传感器产生的事件
pub fn record_virtual_events(count: usize) {
    if count > 0 {
        counter!("sensor_hub_virtual_events_total").increment(count as u64);
    }
}

/// 记录 runtime 队列溢出丢弃的事件
pub fn record_runtime_events_dropped(count: usize) {
    if count > 0 {
        counter!("sensor_hub_runtime_events_dropped_total").increment(count as u64);
    }
}

pub fn record_wake_lock_held(held: bool) {
    gauge!("sensor_hub_wake_lock_held").set(if held { 1.0 } else { 0.0 });
}

/// 记录 watchdog 超时强制释放 wake lock
pub fn record_wake_lock_timeout() {
    counter!("sensor_hub_wake_lock_timeouts_total").increment(1);
}

pub fn record_active_sensors(count: usize) {
    gauge!("sensor_hub_active_sensors").set(count as f64);
}

pub fn record_active_connections(count: usize) {
    gauge!("sensor_hub_active_connections").set(count as f64);
}

pub fn record_operating_mode(code: u8) {
    gauge!("sensor_hub_operating_mode").set(f64::from(code));
}

/// 在线统计 mean/min/max (Welford 算法)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl std::fmt::Display for RunningStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "N/A");
        }
        write!(
            f,
            "min={:.1}, max={:.1}, mean={:.2}, std={:.2} (n={})",
            self.min,
            self.max,
            self.mean(),
            self.std_dev(),
            self.count
        )
    }
}
