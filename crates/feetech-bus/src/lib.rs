//! # Feetech Bus
//!
//! 半双工串行总线的传输层抽象：一次事务 = 发送一条指令包，并在超时内接收状态包。
//!
//! - [`Transport`]：控制器依赖的唯一接口（寄存器读写、同步读写）
//! - [`FramedTransport`]：基于任意字节流端口的 Feetech 帧收发实现
//! - `SerialTransport`：`serialport` 后端（feature `serial`，默认开启）
//! - `MockTransport`：内存模拟舵机（feature `mock`）
//!
//! 传输层从不在内部重试，重试策略由上层控制循环决定。

use std::io;
use thiserror::Error;

pub use feetech_protocol::{ActuatorId, ProtocolError, Register, ServoErrorBits};

pub mod framed;
pub mod sts3215;

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use framed::{FramedTransport, Port};
pub use sts3215::Sts3215Bus;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockFault, MockHandle, MockTransport, MockWrite};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Reply timeout from id {id}")]
    Timeout { id: ActuatorId },

    #[error("Corrupt reply: {0}")]
    Corrupt(#[from] ProtocolError),

    #[error("Failed to open serial port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Servo {id} reported error: {bits:?}")]
    Status { id: ActuatorId, bits: ServoErrorBits },
}

impl BusError {
    /// 端口级错误（设备拔出、无权限等），重试通常无法恢复
    pub fn is_fatal(&self) -> bool {
        match self {
            BusError::OpenFailed { .. } => true,
            BusError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::NotFound
                    | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout { .. })
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, BusError::Corrupt(_))
    }
}

/// 总线传输接口
///
/// 实现者只需提供 `ping` / `read_block` / `write_block`，
/// 同步读写的默认实现退化为逐个舵机的事务。
pub trait Transport: Send {
    /// PING 一个舵机
    fn ping(&mut self, id: ActuatorId) -> Result<(), BusError>;

    /// 从单个舵机读取连续字节块
    fn read_block(&mut self, id: ActuatorId, address: u8, len: u8) -> Result<Vec<u8>, BusError>;

    /// 向单个舵机写入连续字节块
    fn write_block(&mut self, id: ActuatorId, address: u8, data: &[u8]) -> Result<(), BusError>;

    fn read_register(&mut self, id: ActuatorId, register: &Register) -> Result<i32, BusError> {
        let bytes = self.read_block(id, register.address, register.size)?;
        Ok(register.decode(&bytes)?)
    }

    fn write_register(
        &mut self,
        id: ActuatorId,
        register: &Register,
        value: i32,
    ) -> Result<(), BusError> {
        let bytes = register.encode(value)?;
        self.write_block(id, register.address, &bytes)
    }

    /// 一次事务把同一寄存器写入多个舵机
    fn sync_write(&mut self, register: &Register, values: &[(ActuatorId, i32)]) -> Result<(), BusError> {
        for &(id, value) in values {
            self.write_register(id, register, value)?;
        }
        Ok(())
    }

    /// 一次事务从多个舵机读取同一寄存器，结果顺序与 `ids` 一致
    fn sync_read(&mut self, register: &Register, ids: &[ActuatorId]) -> Result<Vec<i32>, BusError> {
        ids.iter().map(|&id| self.read_register(id, register)).collect()
    }

    /// 一次事务从多个舵机读取同一连续字节块
    fn sync_read_block(
        &mut self,
        address: u8,
        len: u8,
        ids: &[ActuatorId],
    ) -> Result<Vec<Vec<u8>>, BusError> {
        ids.iter().map(|&id| self.read_block(id, address, len)).collect()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn ping(&mut self, id: ActuatorId) -> Result<(), BusError> {
        (**self).ping(id)
    }

    fn read_block(&mut self, id: ActuatorId, address: u8, len: u8) -> Result<Vec<u8>, BusError> {
        (**self).read_block(id, address, len)
    }

    fn write_block(&mut self, id: ActuatorId, address: u8, data: &[u8]) -> Result<(), BusError> {
        (**self).write_block(id, address, data)
    }

    fn read_register(&mut self, id: ActuatorId, register: &Register) -> Result<i32, BusError> {
        (**self).read_register(id, register)
    }

    fn write_register(
        &mut self,
        id: ActuatorId,
        register: &Register,
        value: i32,
    ) -> Result<(), BusError> {
        (**self).write_register(id, register, value)
    }

    fn sync_write(&mut self, register: &Register, values: &[(ActuatorId, i32)]) -> Result<(), BusError> {
        (**self).sync_write(register, values)
    }

    fn sync_read(&mut self, register: &Register, ids: &[ActuatorId]) -> Result<Vec<i32>, BusError> {
        (**self).sync_read(register, ids)
    }

    fn sync_read_block(
        &mut self,
        address: u8,
        len: u8,
        ids: &[ActuatorId],
    ) -> Result<Vec<Vec<u8>>, BusError> {
        (**self).sync_read_block(address, len, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(
            BusError::OpenFailed {
                port: "/dev/null".into(),
                reason: "busy".into()
            }
            .is_fatal()
        );
        assert!(BusError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_fatal());
        assert!(!BusError::Timeout { id: 1 }.is_fatal());
        assert!(!BusError::Corrupt(ProtocolError::PacketTooLarge(300)).is_fatal());
    }

    #[test]
    fn test_protocol_error_converts_to_corrupt() {
        let err: BusError = ProtocolError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_corrupt());
        assert!(!err.is_timeout());
    }
}
