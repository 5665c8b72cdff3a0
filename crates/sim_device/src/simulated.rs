//! SimulatedDevice - rate-driven generator threads behind a blocking poll

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use contracts::{
    Device, DeviceError, DirectChannelDescriptor, HalVersion, HubConfig, OperatingMode,
    RateLevel, SensorDescriptor, SensorEvent, SensorHandle,
};
use tracing::{debug, trace, warn};

use crate::generator::ValueGenerator;

/// Upper bound on one blocking poll so shutdown is observed promptly
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Fastest rate a generator thread will run at
const MIN_PERIOD_NS: i64 = 1_000_000;

/// Rate used until the hub sends a batch call
const DEFAULT_PERIOD_NS: i64 = 200_000_000;

/// Device whose sensors are generator threads.
///
/// Each enabled sensor owns a thread that sleeps for its sampling period and
/// pushes a sample into a shared queue. `poll` blocks on that queue.
pub struct SimulatedDevice {
    sensors: HashMap<SensorHandle, SensorDescriptor>,
    hal_version: HalVersion,
    noise: f32,
    seed: Option<u64>,
    shared: Arc<Shared>,
    generators: Mutex<HashMap<SensorHandle, Generator>>,
    channels: Mutex<HashSet<i32>>,
    next_channel: AtomicI32,
    mode: Mutex<OperatingMode>,
}

struct Shared {
    queue: Mutex<VecDeque<SensorEvent>>,
    ready: Condvar,
    epoch: Instant,
    interrupted: AtomicBool,
}

impl Shared {
    fn now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    fn push(&self, event: SensorEvent) {
        lock(&self.queue).push_back(event);
        self.ready.notify_one();
    }
}

struct Generator {
    running: Arc<AtomicBool>,
    period_ns: Arc<AtomicI64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedDevice {
    pub fn new(sensors: Vec<SensorDescriptor>, hal_version: HalVersion) -> Self {
        Self {
            sensors: sensors.into_iter().map(|s| (s.handle, s)).collect(),
            hal_version,
            noise: 0.05,
            seed: None,
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
                epoch: Instant::now(),
                interrupted: AtomicBool::new(false),
            }),
            generators: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashSet::new()),
            next_channel: AtomicI32::new(1),
            mode: Mutex::new(OperatingMode::Normal),
        }
    }

    /// Build from the physical sensors and `[simulation]` section of a config
    pub fn from_config(config: &HubConfig) -> Self {
        let simulation = &config.simulation;
        let sensors = config
            .sensors
            .iter()
            .map(|s| {
                let mut descriptor = s.to_descriptor();
                if descriptor.device_id == 0 {
                    descriptor.device_id = simulation.device_id;
                }
                descriptor
            })
            .collect();
        let (major, minor) = simulation.hal_version;

        let mut device = Self::new(sensors, HalVersion::new(major, minor));
        device.noise = simulation.noise_amplitude;
        device.seed = simulation.seed;
        device
    }

    fn descriptor(&self, handle: SensorHandle) -> Result<&SensorDescriptor, DeviceError> {
        self.sensors
            .get(&handle)
            .ok_or(DeviceError::InvalidHandle(handle))
    }

    fn spawn_generator(&self, sensor: &SensorDescriptor, period_ns: Arc<AtomicI64>) -> Arc<AtomicBool> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let shared = Arc::clone(&self.shared);
        let handle = sensor.handle;
        let one_shot = sensor.is_one_shot();
        let mut generator = ValueGenerator::new(sensor, self.noise, self.seed);

        let spawned = thread::Builder::new()
            .name(format!("sim-sensor-{handle}"))
            .spawn(move || {
                debug!(handle = %handle, "generator started");
                while thread_running.load(Ordering::Relaxed) {
                    let period = period_ns.load(Ordering::Relaxed).max(MIN_PERIOD_NS);
                    thread::sleep(Duration::from_nanos(period as u64));
                    if !thread_running.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Some(values) = generator.next_values() {
                        trace!(handle = %handle, "sample generated");
                        shared.push(SensorEvent::data(handle, shared.now_ns(), values));
                        if one_shot {
                            thread_running.store(false, Ordering::Relaxed);
                        }
                    }
                }
                debug!(handle = %handle, "generator stopped");
            });

        if let Err(e) = spawned {
            warn!(handle = %handle, error = %e, "failed to spawn generator thread");
            running.store(false, Ordering::Relaxed);
        }
        running
    }
}

impl Device for SimulatedDevice {
    fn sensor_list(&self) -> Vec<SensorDescriptor> {
        let mut sensors: Vec<_> = self.sensors.values().cloned().collect();
        sensors.sort_by_key(|s| s.handle);
        sensors
    }

    fn poll(&self, buffer: &mut Vec<SensorEvent>, max: usize) -> Result<usize, DeviceError> {
        let mut queue = lock(&self.shared.queue);
        if queue.is_empty() && !self.shared.interrupted.load(Ordering::Acquire) {
            queue = self
                .shared
                .ready
                .wait_timeout(queue, POLL_TIMEOUT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        self.shared.interrupted.store(false, Ordering::Release);

        let count = queue.len().min(max);
        buffer.extend(queue.drain(..count));
        Ok(count)
    }

    fn enable(&self, handle: SensorHandle) -> Result<(), DeviceError> {
        let sensor = self.descriptor(handle)?;
        let mut generators = lock(&self.generators);

        if let Some(existing) = generators.get_mut(&handle) {
            if existing.running.load(Ordering::Relaxed) {
                return Ok(());
            }
            existing.running = self.spawn_generator(sensor, Arc::clone(&existing.period_ns));
            return Ok(());
        }

        let period_ns = Arc::new(AtomicI64::new(DEFAULT_PERIOD_NS));
        let running = self.spawn_generator(sensor, Arc::clone(&period_ns));
        generators.insert(handle, Generator { running, period_ns });
        Ok(())
    }

    fn disable(&self, handle: SensorHandle) -> Result<(), DeviceError> {
        self.descriptor(handle)?;
        if let Some(generator) = lock(&self.generators).get(&handle) {
            generator.running.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    fn batch(
        &self,
        handle: SensorHandle,
        sampling_period_ns: i64,
        _max_report_latency_ns: i64,
    ) -> Result<(), DeviceError> {
        let sensor = self.descriptor(handle)?;
        let period = sampling_period_ns.max(sensor.min_delay_ns).max(MIN_PERIOD_NS);

        let mut generators = lock(&self.generators);
        match generators.get(&handle) {
            Some(generator) => generator.period_ns.store(period, Ordering::Relaxed),
            None => {
                generators.insert(
                    handle,
                    Generator {
                        running: Arc::new(AtomicBool::new(false)),
                        period_ns: Arc::new(AtomicI64::new(period)),
                    },
                );
            }
        }
        Ok(())
    }

    fn flush(&self, handle: SensorHandle) -> Result<(), DeviceError> {
        self.descriptor(handle)?;
        self.shared
            .push(SensorEvent::flush_complete(handle, self.shared.now_ns()));
        Ok(())
    }

    fn set_mode(&self, mode: OperatingMode) -> Result<(), DeviceError> {
        debug!(mode = %mode, "simulated device mode changed");
        *lock(&self.mode) = mode;
        Ok(())
    }

    fn inject_event(&self, event: &SensorEvent) -> Result<(), DeviceError> {
        if !lock(&self.mode).is_injection() {
            return Err(DeviceError::failed("device is not in data injection mode"));
        }
        self.descriptor(event.sensor)?;

        let mut event = event.clone();
        if event.timestamp == 0 {
            event.timestamp = self.shared.now_ns();
        }
        self.shared.push(event);
        Ok(())
    }

    fn register_direct_channel(&self, channel: &DirectChannelDescriptor) -> Result<i32, DeviceError> {
        let id = self.next_channel.fetch_add(1, Ordering::Relaxed);
        lock(&self.channels).insert(id);
        debug!(channel = id, size = channel.size, "direct channel registered");
        Ok(id)
    }

    fn unregister_direct_channel(&self, channel_id: i32) {
        lock(&self.channels).remove(&channel_id);
    }

    fn configure_direct_report(
        &self,
        channel_id: i32,
        handle: SensorHandle,
        rate: RateLevel,
    ) -> Result<i32, DeviceError> {
        self.descriptor(handle)?;
        if !lock(&self.channels).contains(&channel_id) {
            return Err(DeviceError::failed(format!("unknown channel {channel_id}")));
        }
        Ok(if rate == RateLevel::Stop { 0 } else { handle.raw() })
    }

    fn hal_version(&self) -> HalVersion {
        self.hal_version
    }

    fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::Release);
        self.shared.ready.notify_all();
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        for generator in lock(&self.generators).values() {
            generator.running.store(false, Ordering::Relaxed);
        }
    }
}
