//! # Integration Tests
//!
//! sensor hub 跨 crate 集成测试。
//!
//! 覆盖：
//! - 路由不变量 (活跃记录、flush 归属、事件顺序)
//! - wake lock 计数与确认超时 watchdog
//! - 运行模式、数据注入与直连通道
//! - 热插拔、runtime 传感器与接近通知
//! - 基于模拟设备的端到端运行

#[cfg(test)]
mod support;

#[cfg(test)]
mod properties;

#[cfg(test)]
mod features;

#[cfg(test)]
mod e2e;
