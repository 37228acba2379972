//! 控制循环状态
//!
//! `Starting → Running → Stopping → Stopped`，以原子量存储，调用线程可随时查询。

use std::sync::atomic::{AtomicU8, Ordering};

/// 控制循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum LoopState {
    /// 启动中：写入初始 P 系数与扭矩状态
    #[default]
    Starting = 0,
    /// 周期运行
    Running = 1,
    /// 正在退出（显式关闭或链路失败）
    Stopping = 2,
    /// 线程已退出，传输已释放
    Stopped = 3,
}

impl LoopState {
    /// 从 u8 转换，无效值视为 Stopped
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// 是否已经（或正在）退出
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

/// 控制循环状态（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicLoopState {
    inner: AtomicU8,
}

impl AtomicLoopState {
    pub fn new(state: LoopState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> LoopState {
        LoopState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: LoopState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }

    /// 比较并交换，成功返回 true
    pub fn compare_exchange(
        &self,
        current: LoopState,
        new: LoopState,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), success, failure)
            .is_ok()
    }
}

impl Default for AtomicLoopState {
    fn default() -> Self {
        Self::new(LoopState::Starting)
    }
}
