//! # Feetech Protocol
//!
//! Feetech 串行总线舵机协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `packet`: 指令包编码、状态包解析、校验和
//! - `registers`: STS3215 控制表（寄存器地址、宽度、符号编码）
//! - `conv`: 原始寄存器值与物理单位之间的转换
//!
//! ## 字节序
//!
//! STS 系列舵机的多字节寄存器使用小端字节序（低字节在前），
//! 位置/速度字段使用"符号-幅值"编码（最高位为方向位）。

pub mod conv;
pub mod packet;
pub mod registers;

pub use conv::PositionUnit;
pub use packet::*;
pub use registers::*;

use thiserror::Error;

/// 舵机 ID（总线上唯一，1..=252）
pub type ActuatorId = u8;

/// 广播 ID（SYNC_READ / SYNC_WRITE 使用）
pub const BROADCAST_ID: ActuatorId = 0xFE;

/// 最大可用舵机 ID
pub const MAX_ID: ActuatorId = 0xFC;

/// 检查舵机 ID 是否可以分配给单个设备（1..=252）
pub fn is_valid_id(id: ActuatorId) -> bool {
    (1..=MAX_ID).contains(&id)
}

/// 协议编解码错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid packet header: {0:02X?}")]
    InvalidHeader([u8; 2]),

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Unexpected reply from id {actual} (expected {expected})")]
    UnexpectedId { expected: ActuatorId, actual: ActuatorId },

    #[error("Value {value} out of range for register {register}")]
    ValueOutOfRange { register: &'static str, value: i32 },

    /// 物理量无法换算为整数寄存器值（NaN、无穷或溢出）
    #[error("Value not representable for register {register}")]
    NotRepresentable { register: &'static str },

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}
