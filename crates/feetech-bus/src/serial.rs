//! serialport 后端

use crate::{BusError, FramedTransport, Port};
use serialport::{ClearBuffer, SerialPort};
use std::io;
use std::time::Duration;
use tracing::info;

/// 默认单次事务超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20);

/// 串口传输
pub type SerialTransport = FramedTransport<Box<dyn SerialPort>>;

impl Port for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

impl FramedTransport<Box<dyn SerialPort>> {
    /// 打开串口
    ///
    /// `timeout` 同时用作端口读超时与单次事务超时。
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self, BusError> {
        let serial = serialport::new(port, baud_rate).timeout(timeout).open().map_err(|e| {
            BusError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            }
        })?;

        info!(
            "Opened serial port {} at {} baud (timeout {:?})",
            port, baud_rate, timeout
        );
        Ok(FramedTransport::new(serial).with_timeout(timeout))
    }
}
