//! 共享状态
//!
//! 遥测缓存每个舵机一个 `ArcSwap` 槽位：控制循环整体替换样本，
//! 调用线程无锁读取，单个舵机的位置与速度总是成对更新。

use crate::heartbeat::LinkMonitor;
use crate::mode::{AtomicLoopState, LoopState};
use arc_swap::{ArcSwap, ArcSwapOption};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// 单个舵机的遥测样本（原始寄存器值）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetrySample {
    pub position: i32,
    pub speed: i32,
    /// 每个舵机独立递增，0 表示尚未读到
    pub sequence: u64,
    /// 读取完成的单调时间戳（微秒）
    pub timestamp_us: u64,
}

impl TelemetrySample {
    /// 首次成功读取之前的占位值
    pub const UNKNOWN: Self = Self {
        position: 0,
        speed: 0,
        sequence: 0,
        timestamp_us: 0,
    };

    pub fn is_known(&self) -> bool {
        self.sequence != 0
    }

    pub fn position(&self) -> Option<i32> {
        self.is_known().then_some(self.position)
    }

    pub fn speed(&self) -> Option<i32> {
        self.is_known().then_some(self.speed)
    }

    /// 基于当前样本生成下一条样本
    pub fn next(&self, position: i32, speed: i32, timestamp_us: u64) -> Self {
        Self {
            position,
            speed,
            sequence: self.sequence + 1,
            timestamp_us,
        }
    }
}

impl Default for TelemetrySample {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// 遥测缓存
#[derive(Debug)]
pub struct TelemetryCache {
    slots: Vec<ArcSwap<TelemetrySample>>,
}

impl TelemetryCache {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| ArcSwap::from_pointee(TelemetrySample::UNKNOWN)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 发布样本（仅控制循环调用）
    pub fn publish(&self, index: usize, sample: TelemetrySample) {
        if let Some(slot) = self.slots.get(index) {
            slot.store(Arc::new(sample));
        }
    }

    /// 读取样本（无锁，越界返回 UNKNOWN）
    pub fn read(&self, index: usize) -> TelemetrySample {
        self.slots.get(index).map(|slot| **slot.load()).unwrap_or(TelemetrySample::UNKNOWN)
    }

    /// 所有舵机的样本（配置顺序）
    pub fn snapshot(&self) -> Vec<TelemetrySample> {
        self.slots.iter().map(|slot| **slot.load()).collect()
    }
}

/// 链路失败信息
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkFailureInfo {
    pub consecutive_failures: u32,
    pub last_error: String,
}

/// 控制器状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerStatus {
    pub state: LoopState,
    /// 最近有事务失败，但尚未达到阈值
    pub degraded: bool,
    pub consecutive_failures: u32,
    pub link_failure: Option<LinkFailureInfo>,
}

/// 控制线程与调用线程共享的上下文
#[derive(Debug)]
pub struct ControllerContext {
    pub telemetry: TelemetryCache,
    /// 每个舵机最近一次成功写入的扭矩状态
    pub torque: Vec<AtomicBool>,
    pub loop_state: AtomicLoopState,
    pub degraded: AtomicBool,
    pub consecutive_failures: AtomicU32,
    pub link_failure: ArcSwapOption<LinkFailureInfo>,
    pub link: LinkMonitor,
}

impl ControllerContext {
    pub fn new(actuators: usize, link_timeout: Duration) -> Self {
        Self {
            telemetry: TelemetryCache::new(actuators),
            torque: (0..actuators).map(|_| AtomicBool::new(false)).collect(),
            loop_state: AtomicLoopState::new(LoopState::Starting),
            degraded: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            link_failure: ArcSwapOption::empty(),
            link: LinkMonitor::new(link_timeout),
        }
    }

    pub fn set_torque_all(&self, enabled: bool) {
        for flag in &self.torque {
            flag.store(enabled, Ordering::Release);
        }
    }

    pub fn torque_states(&self) -> Vec<bool> {
        self.torque.iter().map(|flag| flag.load(Ordering::Acquire)).collect()
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.loop_state.get(Ordering::Acquire),
            degraded: self.degraded.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            link_failure: self.link_failure.load_full().map(|info| info.as_ref().clone()),
        }
    }
}
