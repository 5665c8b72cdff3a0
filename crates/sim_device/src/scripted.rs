//! ScriptedDevice - 确定性的测试设备
//!
//! `poll` 按顺序返回排队的步骤，每一步是一批事件或一个错误。
//! 控制调用会被记录，并可注入失败。

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{
    Device, DeviceError, DirectChannelDescriptor, HalVersion, OperatingMode, RateLevel,
    SensorDescriptor, SensorEvent, SensorHandle,
};

/// 脚本为空时 `poll` 阻塞的时长
const IDLE_POLL: Duration = Duration::from_millis(20);

/// 记录的控制调用
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Enable(SensorHandle),
    Disable(SensorHandle),
    Batch {
        handle: SensorHandle,
        period_ns: i64,
        latency_ns: i64,
    },
    Flush(SensorHandle),
    SetMode(OperatingMode),
    Inject(SensorEvent),
    RegisterChannel(i32),
    UnregisterChannel(i32),
    ConfigureChannel {
        channel: i32,
        handle: SensorHandle,
        rate: RateLevel,
    },
    Reconnect,
}

enum PollStep {
    Batch(Vec<SensorEvent>),
    Error(DeviceError),
}

#[derive(Default)]
struct ScriptState {
    steps: VecDeque<PollStep>,
    calls: Vec<DeviceCall>,
    wake_acks: Vec<usize>,
    failing_enables: HashSet<SensorHandle>,
    set_mode_failure: Option<DeviceError>,
    reconnect_failure: Option<DeviceError>,
    next_channel: i32,
}

/// 测试用的确定性 [`Device`]
pub struct ScriptedDevice {
    sensors: Vec<SensorDescriptor>,
    hal_version: Mutex<HalVersion>,
    state: Mutex<ScriptState>,
    ready: Condvar,
    reconnecting: AtomicBool,
    auto_flush: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedDevice {
    pub fn new(sensors: Vec<SensorDescriptor>) -> Self {
        Self {
            sensors,
            hal_version: Mutex::new(HalVersion::new(2, 1)),
            state: Mutex::new(ScriptState {
                next_channel: 1,
                ..Default::default()
            }),
            ready: Condvar::new(),
            reconnecting: AtomicBool::new(false),
            auto_flush: AtomicBool::new(false),
        }
    }

    /// 每次 `flush` 立即回应 flush-complete 事件
    pub fn with_auto_flush(self) -> Self {
        self.auto_flush.store(true, Ordering::Relaxed);
        self
    }

    pub fn with_hal_version(self, version: HalVersion) -> Self {
        *lock(&self.hal_version) = version;
        self
    }

    /// 为后续 `poll` 排队一批事件
    pub fn push_batch(&self, events: Vec<SensorEvent>) {
        lock(&self.state).steps.push_back(PollStep::Batch(events));
        self.ready.notify_all();
    }

    /// 排队一次 poll 失败
    pub fn push_error(&self, error: DeviceError) {
        lock(&self.state).steps.push_back(PollStep::Error(error));
        self.ready.notify_all();
    }

    /// 尚未消费的步骤数
    pub fn pending_steps(&self) -> usize {
        lock(&self.state).steps.len()
    }

    pub fn set_reconnecting(&self, reconnecting: bool) {
        self.reconnecting.store(reconnecting, Ordering::Relaxed);
    }

    /// 使 `enable(handle)` 持续失败直到清除
    pub fn fail_enable(&self, handle: SensorHandle) {
        lock(&self.state).failing_enables.insert(handle);
    }

    pub fn clear_enable_failures(&self) {
        lock(&self.state).failing_enables.clear();
    }

    /// 使下一次 `set_mode` 失败
    pub fn fail_next_set_mode(&self, error: DeviceError) {
        lock(&self.state).set_mode_failure = Some(error);
    }

    /// 使下一次 `reconnect` 失败
    pub fn fail_next_reconnect(&self, error: DeviceError) {
        lock(&self.state).reconnect_failure = Some(error);
    }

    /// 目前记录的所有调用
    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.state).calls.clone()
    }

    /// 取出记录的调用并清空
    pub fn take_calls(&self) -> Vec<DeviceCall> {
        std::mem::take(&mut lock(&self.state).calls)
    }

    /// 传给 `write_wake_lock_handled` 的计数
    pub fn wake_acks(&self) -> Vec<usize> {
        lock(&self.state).wake_acks.clone()
    }

    /// 根据调用记录推算当前已启用的 handle
    pub fn enabled_handles(&self) -> Vec<SensorHandle> {
        let state = lock(&self.state);
        let mut enabled: Vec<SensorHandle> = Vec::new();
        for call in &state.calls {
            match call {
                DeviceCall::Enable(h) if !enabled.contains(h) => enabled.push(*h),
                DeviceCall::Disable(h) => enabled.retain(|e| e != h),
                _ => {}
            }
        }
        enabled.sort();
        enabled
    }

    fn record(&self, call: DeviceCall) {
        lock(&self.state).calls.push(call);
    }
}

impl Device for ScriptedDevice {
    fn sensor_list(&self) -> Vec<SensorDescriptor> {
        self.sensors.clone()
    }

    fn poll(&self, buffer: &mut Vec<SensorEvent>, max: usize) -> Result<usize, DeviceError> {
        let mut state = lock(&self.state);
        if state.steps.is_empty() {
            state = self
                .ready
                .wait_timeout(state, IDLE_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        match state.steps.pop_front() {
            None => Ok(0),
            Some(PollStep::Error(error)) => Err(error),
            Some(PollStep::Batch(mut events)) => {
                if events.len() > max {
                    let rest = events.split_off(max);
                    state.steps.push_front(PollStep::Batch(rest));
                }
                let count = events.len();
                buffer.extend(events);
                Ok(count)
            }
        }
    }

    fn enable(&self, handle: SensorHandle) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        if state.failing_enables.contains(&handle) {
            return Err(DeviceError::failed(format!("enable {handle} rejected")));
        }
        state.calls.push(DeviceCall::Enable(handle));
        Ok(())
    }

    fn disable(&self, handle: SensorHandle) -> Result<(), DeviceError> {
        self.record(DeviceCall::Disable(handle));
        Ok(())
    }

    fn batch(
        &self,
        handle: SensorHandle,
        sampling_period_ns: i64,
        max_report_latency_ns: i64,
    ) -> Result<(), DeviceError> {
        self.record(DeviceCall::Batch {
            handle,
            period_ns: sampling_period_ns,
            latency_ns: max_report_latency_ns,
        });
        Ok(())
    }

    fn flush(&self, handle: SensorHandle) -> Result<(), DeviceError> {
        self.record(DeviceCall::Flush(handle));
        if self.auto_flush.load(Ordering::Relaxed) {
            self.push_batch(vec![SensorEvent::flush_complete(handle, 0)]);
        }
        Ok(())
    }

    fn set_mode(&self, mode: OperatingMode) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state.calls.push(DeviceCall::SetMode(mode));
        match state.set_mode_failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn inject_event(&self, event: &SensorEvent) -> Result<(), DeviceError> {
        self.record(DeviceCall::Inject(event.clone()));
        Ok(())
    }

    fn register_direct_channel(&self, _channel: &DirectChannelDescriptor) -> Result<i32, DeviceError> {
        let mut state = lock(&self.state);
        let id = state.next_channel;
        state.next_channel += 1;
        state.calls.push(DeviceCall::RegisterChannel(id));
        Ok(id)
    }

    fn unregister_direct_channel(&self, channel_id: i32) {
        self.record(DeviceCall::UnregisterChannel(channel_id));
    }

    fn configure_direct_report(
        &self,
        channel_id: i32,
        handle: SensorHandle,
        rate: RateLevel,
    ) -> Result<i32, DeviceError> {
        self.record(DeviceCall::ConfigureChannel {
            channel: channel_id,
            handle,
            rate,
        });
        Ok(if rate == RateLevel::Stop { 0 } else { handle.raw() })
    }

    fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Relaxed)
    }

    fn reconnect(&self) -> Result<(), DeviceError> {
        let mut state = lock(&self.state);
        state.calls.push(DeviceCall::Reconnect);
        match state.reconnect_failure.take() {
            Some(error) => Err(error),
            None => {
                self.reconnecting.store(false, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    fn write_wake_lock_handled(&self, count: usize) {
        lock(&self.state).wake_acks.push(count);
    }

    fn hal_version(&self) -> HalVersion {
        *lock(&self.hal_version)
    }

    fn interrupt(&self) {
        self.ready.notify_all();
    }
}
