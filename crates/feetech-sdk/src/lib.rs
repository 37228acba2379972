//! Feetech SDK - 飞特串行总线舵机 Rust SDK
//!
//! 后台控制线程以固定频率写目标、批量读取遥测；调用线程只与缓存和邮箱交互，
//! 读取永不阻塞在总线 I/O 上。
//!
//! # 架构设计
//!
//! - **协议层** (`protocol`): 指令包/状态包编解码、STS3215 控制表、单位换算
//! - **总线层** (`bus`): `Transport` 抽象、串口与模拟实现、直接寄存器访问
//! - **驱动层** (`driver`): 控制循环、遥测缓存、链路失败判定、`Controller`
//!
//! # 快速开始
//!
//! ```no_run
//! use feetech_sdk::prelude::*;
//!
//! feetech_sdk::init_logger();
//!
//! let controller = ControllerBuilder::new()
//!     .port("/dev/ttyACM0")
//!     .ids(vec![1, 2, 3])
//!     .frequency_hz(200.0)
//!     .build()
//!     .unwrap();
//!
//! controller.set_new_target(&[0.0, 0.2, -0.2]).unwrap();
//! println!("{:?}", controller.get_present_position());
//! controller.freeze().unwrap();
//! ```

pub use feetech_bus as bus;
pub use feetech_driver as driver;
pub use feetech_protocol as protocol;

pub mod prelude;

pub use feetech_bus::{BusError, Sts3215Bus, Transport};
pub use feetech_driver::{
    ConfigError, Controller, ControllerBuilder, ControllerConfig, ControllerStatus, DriverError,
    LoopConfig, LoopState, MetricsSnapshot, TelemetrySample,
};
pub use feetech_protocol::{ActuatorId, PositionUnit, ProtocolError, RegisterLayout, sts3215};

#[cfg(feature = "serial")]
pub use feetech_bus::SerialTransport;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static LOGGER: Once = Once::new();

/// 初始化日志（fmt + `RUST_LOG`，默认 `info`）
///
/// 可重复调用；若进程中已安装其他 subscriber，则保持不变。
pub fn init_logger() {
    LOGGER.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_is_idempotent() {
        init_logger();
        init_logger();
        tracing::info!("logger initialised twice without panicking");
    }
}
