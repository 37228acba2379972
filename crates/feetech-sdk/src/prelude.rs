//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use feetech_sdk::prelude::*;
//! ```

// 驱动层
pub use crate::driver::{Controller, ControllerBuilder, LoopConfig, LoopState};

// 总线层（直接寄存器访问）
pub use crate::bus::{Sts3215Bus, Transport};

// 协议层
pub use crate::protocol::{ActuatorId, PositionUnit, RegisterLayout};

// 错误类型
pub use crate::bus::BusError;
pub use crate::driver::{ConfigError, DriverError};
pub use crate::protocol::ProtocolError;
