//! 驱动层模块
//!
//! 本模块提供 Feetech 舵机总线的控制器，包括：
//! - 后台控制线程（固定周期写目标、批量读遥测）
//! - 单槽目标邮箱（Last Write Wins）与扭矩请求队列
//! - 遥测缓存（ArcSwap 无锁读取）
//! - 链路失败判定与降级标志
//!
//! # 使用场景
//!
//! 调用线程只与缓存和邮箱交互，不执行任何总线 I/O。
//! 不需要后台循环时，可以直接使用 `feetech_bus::Sts3215Bus`。

mod builder;
pub mod command;
mod controller;
mod error;
pub mod heartbeat;
pub mod metrics;
pub mod mode;
pub mod pipeline;
pub mod registry;
pub mod state;

pub use builder::{ControllerBuilder, ControllerConfig, DEFAULT_BAUD_RATE, DEFAULT_PORT};
pub use command::{CommandMailbox, TargetVector, TorqueRequest};
pub use controller::Controller;
pub use error::{ConfigError, DriverError};
pub use feetech_protocol::{PositionUnit, RegisterLayout};
pub use heartbeat::LinkMonitor;
pub use metrics::{ControllerMetrics, MetricsSnapshot};
pub use mode::{AtomicLoopState, LoopState};
pub use pipeline::{LoopConfig, control_loop, startup};
pub use registry::DeviceRegistry;
pub use state::*;
