//! 指令包 / 状态包编解码
//!
//! 数据包格式（STS/SCS 系列通用）：
//!
//! ```text
//! 指令包: 0xFF 0xFF | ID | LEN | INST | PARAM... | CHK
//! 状态包: 0xFF 0xFF | ID | LEN | ERR  | DATA...  | CHK
//! ```
//!
//! - `LEN` = 参数个数 + 2（INST/ERR 与 CHK）
//! - `CHK` = `!(ID + LEN + INST/ERR + PARAM...)`（取低 8 位）

use crate::{ActuatorId, BROADCAST_ID, ProtocolError};
use bilge::prelude::*;
use bytes::{BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

/// 帧头
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// 单个数据包的最大长度（固件限制）
pub const MAX_PACKET_LEN: usize = 250;

/// 状态包的固定开销：帧头(2) + ID + LEN + ERR + CHK
pub const STATUS_OVERHEAD: usize = 6;

/// 指令类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    SyncRead = 0x82,
    SyncWrite = 0x83,
}

/// 计算校验和
///
/// `body` 为帧头之后、校验字节之前的全部字节。
#[inline]
pub fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// 舵机状态错误位域（状态包 ERR 字节）
///
/// - Bit 0: 电压异常
/// - Bit 1: 角度（位置传感器）异常
/// - Bit 2: 过热
/// - Bit 3: 过流
/// - Bit 4: 保留
/// - Bit 5: 过载
/// - Bit 6-7: 保留
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq)]
pub struct ServoErrorBits {
    pub voltage: bool,
    pub angle: bool,
    pub overheat: bool,
    pub over_current: bool,
    pub reserved_bit4: bool,
    pub overload: bool,
    pub reserved: u2,
}

impl ServoErrorBits {
    /// 从原始字节构造
    pub fn from_byte(byte: u8) -> Self {
        Self::from(u8::new(byte))
    }

    /// 原始字节
    pub fn to_byte(self) -> u8 {
        u8::from(self)
    }

    /// 是否没有任何错误位
    pub fn is_ok(self) -> bool {
        self.to_byte() == 0
    }
}

/// 编码后的指令包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPacket {
    id: ActuatorId,
    instruction: Instruction,
    bytes: Bytes,
}

impl InstructionPacket {
    fn encode(
        id: ActuatorId,
        instruction: Instruction,
        params: &[u8],
    ) -> Result<Self, ProtocolError> {
        let total = params.len() + STATUS_OVERHEAD;
        if total > MAX_PACKET_LEN {
            return Err(ProtocolError::PacketTooLarge(total));
        }
        Ok(Self::build(id, instruction, params))
    }

    /// 调用方保证 `params` 长度不超过限制
    fn build(id: ActuatorId, instruction: Instruction, params: &[u8]) -> Self {
        let total = params.len() + STATUS_OVERHEAD;
        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(&HEADER);
        buf.put_u8(id);
        buf.put_u8((params.len() + 2) as u8);
        buf.put_u8(instruction.into());
        buf.put_slice(params);
        let chk = checksum(&buf[2..]);
        buf.put_u8(chk);

        Self {
            id,
            instruction,
            bytes: buf.freeze(),
        }
    }

    /// PING
    pub fn ping(id: ActuatorId) -> Self {
        Self::build(id, Instruction::Ping, &[])
    }

    /// READ：从 `address` 开始读取 `len` 个字节
    pub fn read(id: ActuatorId, address: u8, len: u8) -> Self {
        Self::build(id, Instruction::Read, &[address, len])
    }

    /// WRITE：从 `address` 开始写入 `data`
    pub fn write(id: ActuatorId, address: u8, data: &[u8]) -> Result<Self, ProtocolError> {
        let mut params: SmallVec<[u8; 8]> = SmallVec::with_capacity(data.len() + 1);
        params.push(address);
        params.extend_from_slice(data);
        Self::encode(id, Instruction::Write, &params)
    }

    /// SYNC_WRITE：一次事务向多个舵机的同一地址写入数据
    ///
    /// 每个条目的数据长度必须等于 `data_len`。
    pub fn sync_write(
        address: u8,
        data_len: u8,
        entries: &[(ActuatorId, &[u8])],
    ) -> Result<Self, ProtocolError> {
        let mut params = Vec::with_capacity(2 + entries.len() * (1 + data_len as usize));
        params.push(address);
        params.push(data_len);
        for (id, data) in entries {
            if data.len() != data_len as usize {
                return Err(ProtocolError::InvalidLength {
                    expected: data_len as usize,
                    actual: data.len(),
                });
            }
            params.push(*id);
            params.extend_from_slice(data);
        }
        Self::encode(BROADCAST_ID, Instruction::SyncWrite, &params)
    }

    /// SYNC_READ：一次事务从多个舵机的同一地址读取 `len` 个字节
    ///
    /// 每个舵机按 `ids` 顺序各回复一个状态包。
    pub fn sync_read(address: u8, len: u8, ids: &[ActuatorId]) -> Result<Self, ProtocolError> {
        let mut params = Vec::with_capacity(2 + ids.len());
        params.push(address);
        params.push(len);
        params.extend_from_slice(ids);
        Self::encode(BROADCAST_ID, Instruction::SyncRead, &params)
    }

    /// 目标 ID（广播指令为 `BROADCAST_ID`）
    pub fn id(&self) -> ActuatorId {
        self.id
    }

    pub fn instruction(&self) -> Instruction {
        self.instruction
    }

    /// 编码后的完整字节
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 舵机是否会对该指令回复状态包
    ///
    /// 广播 WRITE/SYNC_WRITE 不回复；SYNC_READ 虽然是广播，但每个舵机各自回复。
    pub fn expects_reply(&self) -> bool {
        match self.instruction {
            Instruction::SyncRead => true,
            _ => self.id != BROADCAST_ID,
        }
    }
}

/// 解析后的状态包
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPacket {
    pub id: ActuatorId,
    pub error: ServoErrorBits,
    pub data: SmallVec<[u8; 8]>,
}

impl StatusPacket {
    /// 根据 LEN 字段计算完整状态包长度（含帧头与校验）
    #[inline]
    pub fn total_len(length_field: u8) -> usize {
        4 + length_field as usize
    }

    /// 解析一个完整的状态包
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < STATUS_OVERHEAD {
            return Err(ProtocolError::InvalidLength {
                expected: STATUS_OVERHEAD,
                actual: bytes.len(),
            });
        }

        let header = [bytes[0], bytes[1]];
        if header != HEADER {
            return Err(ProtocolError::InvalidHeader(header));
        }

        let total = Self::total_len(bytes[3]);
        if bytes.len() != total || total < STATUS_OVERHEAD {
            return Err(ProtocolError::InvalidLength {
                expected: total,
                actual: bytes.len(),
            });
        }

        let expected = checksum(&bytes[2..total - 1]);
        let actual = bytes[total - 1];
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        Ok(Self {
            id: bytes[2],
            error: ServoErrorBits::from_byte(bytes[4]),
            data: SmallVec::from_slice(&bytes[5..total - 1]),
        })
    }

    /// 编码为字节（用于模拟舵机回复）
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STATUS_OVERHEAD + self.data.len());
        buf.extend_from_slice(&HEADER);
        buf.push(self.id);
        buf.push((self.data.len() + 2) as u8);
        buf.push(self.error.to_byte());
        buf.extend_from_slice(&self.data);
        buf.push(checksum(&buf[2..]));
        buf
    }

    /// 校验回复来源
    pub fn expect_id(&self, expected: ActuatorId) -> Result<(), ProtocolError> {
        if self.id != expected {
            return Err(ProtocolError::UnexpectedId {
                expected,
                actual: self.id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ping_packet_bytes() {
        let packet = InstructionPacket::ping(1);
        assert_eq!(packet.as_bytes(), &[0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
        assert!(packet.expects_reply());
    }

    #[test]
    fn test_read_present_position_packet_bytes() {
        // 读取 1 号舵机 0x38 (56) 开始的 2 个字节
        let packet = InstructionPacket::read(1, 0x38, 2);
        assert_eq!(
            packet.as_bytes(),
            &[0xFF, 0xFF, 0x01, 0x04, 0x02, 0x38, 0x02, 0xBE]
        );
    }

    #[test]
    fn test_sync_write_layout() {
        let packet =
            InstructionPacket::sync_write(42, 2, &[(1, &[0x00, 0x08][..]), (2, &[0x10, 0x00][..])])
                .unwrap();
        let bytes = packet.as_bytes();
        assert_eq!(bytes[2], BROADCAST_ID);
        assert_eq!(bytes[3] as usize, bytes.len() - 4);
        assert_eq!(bytes[4], u8::from(Instruction::SyncWrite));
        assert_eq!(&bytes[5..12], &[42, 2, 1, 0x00, 0x08, 2, 0x10]);
        assert!(!packet.expects_reply());
    }

    #[test]
    fn test_sync_write_rejects_wrong_data_len() {
        let result = InstructionPacket::sync_write(42, 2, &[(1, &[0x00][..])]);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidLength {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_sync_read_expects_reply() {
        let packet = InstructionPacket::sync_read(56, 4, &[1, 2, 3]).unwrap();
        assert!(packet.expects_reply());
        assert_eq!(&packet.as_bytes()[5..10], &[56, 4, 1, 2, 3]);
    }

    #[test]
    fn test_packet_too_large() {
        let data = [0u8; 260];
        assert!(matches!(
            InstructionPacket::write(1, 0, &data),
            Err(ProtocolError::PacketTooLarge(_))
        ));
    }

    #[test]
    fn test_status_decode() {
        let bytes = [0xFF, 0xFF, 0x01, 0x04, 0x00, 0x18, 0x05, 0xDD];
        let status = StatusPacket::decode(&bytes).unwrap();
        assert_eq!(status.id, 1);
        assert!(status.error.is_ok());
        assert_eq!(status.data.as_slice(), &[0x18, 0x05]);
    }

    #[test]
    fn test_status_decode_bad_checksum() {
        let bytes = [0xFF, 0xFF, 0x01, 0x04, 0x00, 0x18, 0x05, 0xDE];
        assert_eq!(
            StatusPacket::decode(&bytes),
            Err(ProtocolError::ChecksumMismatch {
                expected: 0xDD,
                actual: 0xDE
            })
        );
    }

    #[test]
    fn test_status_decode_bad_header() {
        let bytes = [0xFF, 0x00, 0x01, 0x02, 0x00, 0xFC];
        assert!(matches!(
            StatusPacket::decode(&bytes),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_status_decode_truncated() {
        let bytes = [0xFF, 0xFF, 0x01, 0x04, 0x00, 0x18, 0x05];
        assert!(matches!(
            StatusPacket::decode(&bytes),
            Err(ProtocolError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_status_error_bits() {
        let bits = ServoErrorBits::from_byte(0b0010_0100);
        assert!(bits.overheat());
        assert!(bits.overload());
        assert!(!bits.voltage());
        assert!(!bits.over_current());
        assert!(!bits.is_ok());
        assert_eq!(bits.to_byte(), 0b0010_0100);
    }

    #[test]
    fn test_status_encode_decode_with_error() {
        let status = StatusPacket {
            id: 7,
            error: ServoErrorBits::from_byte(0x01),
            data: SmallVec::from_slice(&[1, 2, 3]),
        };
        let decoded = StatusPacket::decode(&status.encode()).unwrap();
        assert_eq!(decoded, status);
        assert!(decoded.error.voltage());
        assert!(decoded.expect_id(8).is_err());
    }

    #[test]
    fn test_instruction_try_from() {
        assert_eq!(Instruction::try_from(0x82u8), Ok(Instruction::SyncRead));
        assert!(Instruction::try_from(0x42u8).is_err());
    }

    proptest! {
        /// 校验字节加上被校验的字节之和恒为 0xFF
        #[test]
        fn prop_checksum_complements_sum(body in proptest::collection::vec(any::<u8>(), 0..64)) {
            let chk = checksum(&body);
            let sum = body.iter().fold(chk, |acc, b| acc.wrapping_add(*b));
            prop_assert_eq!(sum, 0xFF);
        }

        #[test]
        fn prop_write_packet_is_self_consistent(
            id in 0u8..=crate::MAX_ID,
            address in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 1..16),
        ) {
            let packet = InstructionPacket::write(id, address, &data).unwrap();
            let bytes = packet.as_bytes();
            prop_assert_eq!(bytes.len(), StatusPacket::total_len(bytes[3]));
            prop_assert_eq!(bytes[bytes.len() - 1], checksum(&bytes[2..bytes.len() - 1]));
        }
    }
}
