//! Feetech 帧收发
//!
//! 每次事务：清空输入缓冲 → 写指令包 → 按 ID 顺序读取状态包。
//! 接收时逐字节同步帧头，可跳过总线上的残留字节。

use crate::{BusError, Transport};
use feetech_protocol::{
    ActuatorId, BROADCAST_ID, HEADER, InstructionPacket, ProtocolError, Register, StatusPacket,
};
use smallvec::SmallVec;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// 帧头同步时最多丢弃的字节数
const MAX_RESYNC_BYTES: usize = 64;

/// 字节流端口
pub trait Port: Read + Write + Send {
    /// 丢弃尚未读取的输入（上一事务的迟到回复）
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 基于字节流端口的 Feetech 传输实现
pub struct FramedTransport<P: Port> {
    port: P,
    expect_write_ack: bool,
    strict_status: bool,
    /// 单次事务（每个期望回复）的超时
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl<P: Port> FramedTransport<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            expect_write_ack: true,
            strict_status: false,
            timeout: None,
            deadline: None,
        }
    }

    /// 事务超时：从发送请求开始计时，超过后返回 `BusError::Timeout`
    ///
    /// 同步读取按回复数放宽（`timeout × ids`）。未设置时只受端口读超时约束。
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 单播 WRITE 是否等待状态包（舵机 STATUS_RETURN_LEVEL = 1 时为 true）
    pub fn with_write_ack(mut self, expect: bool) -> Self {
        self.expect_write_ack = expect;
        self
    }

    /// 状态包错误位非零时是否视为事务失败
    ///
    /// 默认只记录日志：过载/过热等错误位在保持位置时可能长期存在，
    /// 若视为失败会使遥测读取持续失败。
    pub fn with_strict_status(mut self, strict: bool) -> Self {
        self.strict_status = strict;
        self
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    /// 发送请求并开始计时（`replies` 为期望的状态包数）
    fn send(&mut self, packet: &InstructionPacket, replies: usize) -> Result<(), BusError> {
        self.port.clear_input()?;
        self.port.write_all(packet.as_bytes())?;
        self.port.flush()?;
        self.deadline = self
            .timeout
            .map(|t| Instant::now() + t * replies.max(1) as u32);
        trace!("TX {:?} -> id {}: {:02X?}", packet.instruction(), packet.id(), packet.as_bytes());
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], id: ActuatorId) -> Result<(), BusError> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(BusError::Timeout { id });
            }
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(BusError::Timeout { id }),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    return Err(match e.kind() {
                        io::ErrorKind::TimedOut
                        | io::ErrorKind::WouldBlock
                        | io::ErrorKind::UnexpectedEof => BusError::Timeout { id },
                        _ => BusError::Io(e),
                    });
                },
            }
        }
        Ok(())
    }

    fn read_byte(&mut self, id: ActuatorId) -> Result<u8, BusError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte, id)?;
        Ok(byte[0])
    }

    /// 接收一个状态包，并校验来源 ID
    fn receive(&mut self, expected: ActuatorId) -> Result<StatusPacket, BusError> {
        // 同步帧头 FF FF
        let mut prev = self.read_byte(expected)?;
        let mut skipped = 0usize;
        loop {
            let byte = self.read_byte(expected)?;
            if [prev, byte] == HEADER {
                break;
            }
            skipped += 1;
            if skipped > MAX_RESYNC_BYTES {
                return Err(ProtocolError::InvalidHeader([prev, byte]).into());
            }
            prev = byte;
        }
        if skipped > 0 {
            trace!("RX resync: skipped {} byte(s) before header", skipped);
        }

        // 帧头后可能出现额外的 0xFF
        let mut id = self.read_byte(expected)?;
        while id == 0xFF {
            skipped += 1;
            if skipped > MAX_RESYNC_BYTES {
                return Err(ProtocolError::InvalidHeader([0xFF, 0xFF]).into());
            }
            id = self.read_byte(expected)?;
        }

        let len = self.read_byte(expected)?;
        if len < 2 {
            return Err(ProtocolError::InvalidLength {
                expected: 2,
                actual: len as usize,
            }
            .into());
        }

        let mut frame: SmallVec<[u8; 16]> = SmallVec::from_slice(&[HEADER[0], HEADER[1], id, len]);
        let start = frame.len();
        frame.resize(StatusPacket::total_len(len), 0);
        self.read_exact(&mut frame[start..], expected)?;
        trace!("RX id {}: {:02X?}", id, frame.as_slice());

        let status = StatusPacket::decode(&frame)?;
        status.expect_id(expected)?;

        if !status.error.is_ok() {
            if self.strict_status {
                return Err(BusError::Status {
                    id,
                    bits: status.error,
                });
            }
            warn!("Servo {} status error bits: {:?}", id, status.error);
        }

        Ok(status)
    }

    fn receive_data(&mut self, expected: ActuatorId, len: u8) -> Result<Vec<u8>, BusError> {
        let status = self.receive(expected)?;
        if status.data.len() != len as usize {
            return Err(ProtocolError::InvalidLength {
                expected: len as usize,
                actual: status.data.len(),
            }
            .into());
        }
        Ok(status.data.to_vec())
    }
}

impl<P: Port> Transport for FramedTransport<P> {
    fn ping(&mut self, id: ActuatorId) -> Result<(), BusError> {
        self.send(&InstructionPacket::ping(id), 1)?;
        self.receive(id).map(|_| ())
    }

    fn read_block(&mut self, id: ActuatorId, address: u8, len: u8) -> Result<Vec<u8>, BusError> {
        self.send(&InstructionPacket::read(id, address, len), 1)?;
        self.receive_data(id, len)
    }

    fn write_block(&mut self, id: ActuatorId, address: u8, data: &[u8]) -> Result<(), BusError> {
        self.send(&InstructionPacket::write(id, address, data)?, 1)?;
        if self.expect_write_ack && id != BROADCAST_ID {
            self.receive(id)?;
        }
        Ok(())
    }

    fn sync_write(&mut self, register: &Register, values: &[(ActuatorId, i32)]) -> Result<(), BusError> {
        if values.is_empty() {
            return Ok(());
        }

        let encoded = values
            .iter()
            .map(|&(id, value)| register.encode(value).map(|bytes| (id, bytes)))
            .collect::<Result<Vec<_>, _>>()?;
        let entries: Vec<(ActuatorId, &[u8])> =
            encoded.iter().map(|(id, bytes)| (*id, bytes.as_slice())).collect();

        // 广播包，舵机不回复
        self.send(
            &InstructionPacket::sync_write(register.address, register.size, &entries)?,
            0,
        )
    }

    fn sync_read(&mut self, register: &Register, ids: &[ActuatorId]) -> Result<Vec<i32>, BusError> {
        self.sync_read_block(register.address, register.size, ids)?
            .iter()
            .map(|bytes| register.decode(bytes).map_err(BusError::from))
            .collect()
    }

    fn sync_read_block(
        &mut self,
        address: u8,
        len: u8,
        ids: &[ActuatorId],
    ) -> Result<Vec<Vec<u8>>, BusError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.send(&InstructionPacket::sync_read(address, len, ids)?, ids.len())?;

        // 任一舵机回复失败即整个事务失败
        ids.iter().map(|&id| self.receive_data(id, len)).collect()
    }
}
