//! 驱动层错误类型定义

use feetech_bus::BusError;
use feetech_protocol::ActuatorId;
use thiserror::Error;

/// 构造参数错误（同步返回，不可恢复）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Actuator list is empty")]
    Empty,

    /// 舵机 ID 数与寄存器映射数不一致
    #[error("Got {ids} actuator ids but {layouts} register layouts")]
    Mismatch { ids: usize, layouts: usize },

    /// 输入向量长度与舵机数不一致
    #[error("Expected {expected} values (one per actuator), got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Duplicate actuator id {0}")]
    DuplicateId(ActuatorId),

    #[error("Invalid actuator id {0} (valid range 1..=252)")]
    InvalidId(ActuatorId),

    #[error("Invalid loop frequency: {0} Hz")]
    InvalidFrequency(f64),

    #[error("Invalid failure threshold: {0}")]
    InvalidThreshold(u32),

    /// 目标值无法换算或超出目标寄存器范围（NaN、无穷、越界）
    #[error("Invalid target {value} for actuator {id}")]
    InvalidTarget { id: ActuatorId, value: f64 },
}

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// 连续失败次数达到阈值，控制循环已停止
    #[error("Link failure after {consecutive_failures} consecutive failed iterations: {last_error}")]
    LinkFailure {
        consecutive_failures: u32,
        last_error: String,
    },

    /// 控制循环已停止（显式关闭）
    #[error("Controller stopped")]
    Stopped,

    #[error("Command channel closed")]
    ChannelClosed,

    /// 扭矩请求队列已满（容量 10）
    #[error("Command channel full (buffer size: 10)")]
    ChannelFull,

    #[error("Poisoned lock (thread panic)")]
    PoisonedLock,

    #[error("Operation timeout")]
    Timeout,

    /// 某个舵机尚无遥测数据
    #[error("Telemetry unavailable for actuator {id}")]
    TelemetryUnavailable { id: ActuatorId },

    #[error("Control loop thread error: {0}")]
    LoopThread(String),
}
