//! 控制器性能指标
//!
//! 原子计数器，任意线程可无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// 控制器实时指标
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    /// 控制循环完成的周期数
    pub iterations: AtomicU64,
    /// 超出周期的迭代次数
    pub overruns: AtomicU64,
    /// 成功的总线事务数
    pub transactions_ok: AtomicU64,
    /// 失败的总线事务数
    pub transaction_failures: AtomicU64,
    /// 其中超时的次数
    pub timeouts: AtomicU64,
    /// 其中回复损坏（校验/帧格式/ID 不符）的次数
    pub corrupt_replies: AtomicU64,
    /// 成功写出的目标向量数
    pub target_writes: AtomicU64,
    /// 调用方提交的目标向量数
    pub commands_submitted: AtomicU64,
    /// 邮箱覆盖次数
    ///
    /// 快速增长说明调用方提交频率高于控制频率（正常现象），
    /// 或控制循环被总线延迟拖慢。
    pub command_overwrites: AtomicU64,
    /// 发布到遥测缓存的舵机样本数
    pub telemetry_publishes: AtomicU64,
    /// 成功应用的扭矩请求数
    pub torque_writes: AtomicU64,
    /// 寄存器无法编码而被丢弃的目标向量数（不计入链路失败）
    pub rejected_targets: AtomicU64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            transactions_ok: self.transactions_ok.load(Ordering::Relaxed),
            transaction_failures: self.transaction_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            corrupt_replies: self.corrupt_replies.load(Ordering::Relaxed),
            target_writes: self.target_writes.load(Ordering::Relaxed),
            commands_submitted: self.commands_submitted.load(Ordering::Relaxed),
            command_overwrites: self.command_overwrites.load(Ordering::Relaxed),
            telemetry_publishes: self.telemetry_publishes.load(Ordering::Relaxed),
            torque_writes: self.torque_writes.load(Ordering::Relaxed),
            rejected_targets: self.rejected_targets.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.iterations,
            &self.overruns,
            &self.transactions_ok,
            &self.transaction_failures,
            &self.timeouts,
            &self.corrupt_replies,
            &self.target_writes,
            &self.commands_submitted,
            &self.command_overwrites,
            &self.telemetry_publishes,
            &self.torque_writes,
            &self.rejected_targets,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub iterations: u64,
    pub overruns: u64,
    pub transactions_ok: u64,
    pub transaction_failures: u64,
    pub timeouts: u64,
    pub corrupt_replies: u64,
    pub target_writes: u64,
    pub commands_submitted: u64,
    pub command_overwrites: u64,
    pub telemetry_publishes: u64,
    pub torque_writes: u64,
    pub rejected_targets: u64,
}

impl MetricsSnapshot {
    /// 邮箱覆盖率（百分比）
    pub fn overwrite_rate(&self) -> f64 {
        if self.commands_submitted == 0 {
            return 0.0;
        }
        (self.command_overwrites as f64 / self.commands_submitted as f64) * 100.0
    }

    /// 事务失败率（百分比）
    pub fn failure_rate(&self) -> f64 {
        let total = self.transactions_ok + self.transaction_failures;
        if total == 0 {
            return 0.0;
        }
        (self.transaction_failures as f64 / total as f64) * 100.0
    }

    /// 超周期率（百分比）
    pub fn overrun_rate(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        (self.overruns as f64 / self.iterations as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default() {
        let snapshot = ControllerMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.overwrite_rate(), 0.0);
        assert_eq!(snapshot.failure_rate(), 0.0);
    }

    #[test]
    fn test_rates() {
        let metrics = ControllerMetrics::new();
        metrics.commands_submitted.fetch_add(10, Ordering::Relaxed);
        metrics.command_overwrites.fetch_add(4, Ordering::Relaxed);
        metrics.transactions_ok.fetch_add(3, Ordering::Relaxed);
        metrics.transaction_failures.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert!((snapshot.overwrite_rate() - 40.0).abs() < 1e-9);
        assert!((snapshot.failure_rate() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let metrics = ControllerMetrics::new();
        metrics.iterations.fetch_add(100, Ordering::Relaxed);
        metrics.torque_writes.fetch_add(2, Ordering::Relaxed);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
