//! 命令通道
//!
//! - 目标向量：单槽邮箱（Last Write Wins），控制循环每周期最多取一次
//! - 扭矩请求：容量 10 的 FIFO 队列，每个请求携带应答通道

use crate::error::DriverError;
use crossbeam_channel::Sender;
use feetech_bus::BusError;
use smallvec::SmallVec;
use std::sync::Mutex;

/// 目标向量（原始寄存器值，按配置顺序，每个舵机一个）
///
/// 8 个舵机以内不分配堆内存。
pub type TargetVector = SmallVec<[i32; 8]>;

/// 扭矩请求队列容量
pub const TORQUE_QUEUE_CAPACITY: usize = 10;

/// 目标向量邮箱
#[derive(Debug, Default)]
pub struct CommandMailbox {
    slot: Mutex<Option<TargetVector>>,
}

impl CommandMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交新目标，覆盖未被取走的旧目标
    ///
    /// 返回是否发生了覆盖。
    pub fn submit(&self, targets: TargetVector) -> Result<bool, DriverError> {
        let mut slot = self.slot.lock().map_err(|_| DriverError::PoisonedLock)?;
        let overwritten = slot.is_some();
        *slot = Some(targets);
        Ok(overwritten)
    }

    /// 取出最新目标（插槽变为空）
    pub fn take_latest(&self) -> Result<Option<TargetVector>, DriverError> {
        let mut slot = self.slot.lock().map_err(|_| DriverError::PoisonedLock)?;
        Ok(slot.take())
    }

    /// 写入失败后放回目标，仅在期间没有更新的目标时生效
    ///
    /// 返回是否放回。
    pub fn requeue_if_empty(&self, targets: TargetVector) -> Result<bool, DriverError> {
        let mut slot = self.slot.lock().map_err(|_| DriverError::PoisonedLock)?;
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(targets);
        Ok(true)
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// 模拟持锁线程 panic
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _slot = self.slot.lock();
            panic!("mailbox holder panicked");
        }));
    }
}

/// 扭矩使能/失能请求
///
/// 控制循环在下一周期开始时应用，并通过 `ack` 返回写入结果。
#[derive(Debug)]
pub struct TorqueRequest {
    pub enable: bool,
    pub ack: Sender<Result<(), BusError>>,
}
