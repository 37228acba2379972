//! 控制表寄存器定义
//!
//! 每个寄存器由地址、字节宽度、符号编码组成。多字节寄存器为小端字节序。

use crate::ProtocolError;
use smallvec::SmallVec;

/// 寄存器值编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// 无符号整数
    Unsigned,
    /// 符号-幅值：`sign_bit` 位为方向位，其余低位为幅值
    SignMagnitude { sign_bit: u8 },
}

/// 寄存器访问权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// 控制表中的一个寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub name: &'static str,
    pub address: u8,
    pub size: u8,
    pub encoding: Encoding,
    pub access: Access,
}

impl Register {
    pub const fn new(
        name: &'static str,
        address: u8,
        size: u8,
        encoding: Encoding,
        access: Access,
    ) -> Self {
        Self {
            name,
            address,
            size,
            encoding,
            access,
        }
    }

    const fn rw(name: &'static str, address: u8, size: u8) -> Self {
        Self::new(name, address, size, Encoding::Unsigned, Access::ReadWrite)
    }

    const fn ro(name: &'static str, address: u8, size: u8) -> Self {
        Self::new(name, address, size, Encoding::Unsigned, Access::ReadOnly)
    }

    const fn signed(mut self, sign_bit: u8) -> Self {
        self.encoding = Encoding::SignMagnitude { sign_bit };
        self
    }

    /// 寄存器之后的第一个地址
    pub fn end(&self) -> u16 {
        self.address as u16 + self.size as u16
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// 将整数值编码为寄存器字节（小端）
    pub fn encode(&self, value: i32) -> Result<SmallVec<[u8; 4]>, ProtocolError> {
        let out_of_range = || ProtocolError::ValueOutOfRange {
            register: self.name,
            value,
        };
        let bits = self.size as u32 * 8;

        let raw: u32 = match self.encoding {
            Encoding::Unsigned => {
                let max = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
                u32::try_from(value).ok().filter(|v| *v <= max).ok_or_else(out_of_range)?
            },
            Encoding::SignMagnitude { sign_bit } => {
                let magnitude = value.unsigned_abs();
                if magnitude >= (1u32 << sign_bit) {
                    return Err(out_of_range());
                }
                if value < 0 { magnitude | (1u32 << sign_bit) } else { magnitude }
            },
        };

        Ok(SmallVec::from_slice(&raw.to_le_bytes()[..self.size as usize]))
    }

    /// 将寄存器字节（小端）解码为整数值
    pub fn decode(&self, bytes: &[u8]) -> Result<i32, ProtocolError> {
        if bytes.len() != self.size as usize {
            return Err(ProtocolError::InvalidLength {
                expected: self.size as usize,
                actual: bytes.len(),
            });
        }

        let raw = bytes.iter().rev().fold(0u32, |acc, b| (acc << 8) | *b as u32);

        Ok(match self.encoding {
            Encoding::Unsigned => raw as i32,
            Encoding::SignMagnitude { sign_bit } => {
                let magnitude = (raw & ((1u32 << sign_bit) - 1)) as i32;
                if raw & (1u32 << sign_bit) != 0 { -magnitude } else { magnitude }
            },
        })
    }
}

/// STS3215 控制表
pub mod sts3215 {
    use super::Register;

    // === EEPROM ===
    pub const MODEL: Register = Register::ro("model", 3, 2);
    pub const ID: Register = Register::rw("id", 5, 1);
    pub const BAUD_RATE: Register = Register::rw("baud_rate", 6, 1);
    pub const RETURN_DELAY_TIME: Register = Register::rw("return_delay_time", 7, 1);
    pub const STATUS_RETURN_LEVEL: Register = Register::rw("status_return_level", 8, 1);
    pub const MIN_ANGLE_LIMIT: Register = Register::rw("min_angle_limit", 9, 2);
    pub const MAX_ANGLE_LIMIT: Register = Register::rw("max_angle_limit", 11, 2);
    pub const MAX_TEMPERATURE_LIMIT: Register = Register::rw("max_temperature_limit", 13, 1);
    pub const MAX_VOLTAGE_LIMIT: Register = Register::rw("max_voltage_limit", 14, 1);
    pub const MIN_VOLTAGE_LIMIT: Register = Register::rw("min_voltage_limit", 15, 1);
    pub const MAX_TORQUE_LIMIT: Register = Register::rw("max_torque_limit", 16, 2);
    pub const PHASE: Register = Register::rw("phase", 18, 1);
    pub const UNLOADING_CONDITION: Register = Register::rw("unloading_condition", 19, 1);
    pub const LED_ALARM_CONDITION: Register = Register::rw("led_alarm_condition", 20, 1);
    pub const P_COEFFICIENT: Register = Register::rw("p_coefficient", 21, 1);
    pub const D_COEFFICIENT: Register = Register::rw("d_coefficient", 22, 1);
    pub const I_COEFFICIENT: Register = Register::rw("i_coefficient", 23, 1);
    pub const MINIMUM_STARTUP_FORCE: Register = Register::rw("minimum_startup_force", 24, 2);
    pub const CW_DEAD_ZONE: Register = Register::rw("cw_dead_zone", 26, 1);
    pub const CCW_DEAD_ZONE: Register = Register::rw("ccw_dead_zone", 27, 1);
    pub const PROTECTION_CURRENT: Register = Register::rw("protection_current", 28, 2);
    pub const ANGULAR_RESOLUTION: Register = Register::rw("angular_resolution", 30, 1);
    pub const OFFSET: Register = Register::rw("offset", 31, 2).signed(11);
    pub const MODE: Register = Register::rw("mode", 33, 1);
    pub const PROTECTIVE_TORQUE: Register = Register::rw("protective_torque", 34, 1);
    pub const PROTECTION_TIME: Register = Register::rw("protection_time", 35, 1);
    pub const OVERLOAD_TORQUE: Register = Register::rw("overload_torque", 36, 1);
    pub const SPEED_CLOSED_LOOP_P: Register = Register::rw("speed_closed_loop_p", 37, 1);
    pub const OVER_CURRENT_PROTECTION_TIME: Register =
        Register::rw("over_current_protection_time", 38, 1);
    pub const VELOCITY_CLOSED_LOOP_I: Register = Register::rw("velocity_closed_loop_i", 39, 1);

    // === SRAM ===
    pub const TORQUE_ENABLE: Register = Register::rw("torque_enable", 40, 1);
    pub const ACCELERATION: Register = Register::rw("acceleration", 41, 1);
    pub const GOAL_POSITION: Register = Register::rw("goal_position", 42, 2).signed(15);
    pub const GOAL_TIME: Register = Register::rw("goal_time", 44, 2);
    pub const GOAL_SPEED: Register = Register::rw("goal_speed", 46, 2).signed(15);
    pub const TORQUE_LIMIT: Register = Register::rw("torque_limit", 48, 2);
    pub const LOCK: Register = Register::rw("lock", 55, 1);
    pub const PRESENT_POSITION: Register = Register::ro("present_position", 56, 2).signed(15);
    pub const PRESENT_SPEED: Register = Register::ro("present_speed", 58, 2).signed(15);
    pub const PRESENT_LOAD: Register = Register::ro("present_load", 60, 2).signed(10);
    pub const PRESENT_VOLTAGE: Register = Register::ro("present_voltage", 62, 1);
    pub const PRESENT_TEMPERATURE: Register = Register::ro("present_temperature", 63, 1);
    pub const STATUS: Register = Register::ro("status", 65, 1);
    pub const MOVING: Register = Register::ro("moving", 66, 1);
    pub const PRESENT_CURRENT: Register = Register::ro("present_current", 69, 2);
    pub const MAXIMUM_ACCELERATION: Register = Register::rw("maximum_acceleration", 85, 2);
}

/// 控制器使用的寄存器映射（每个舵机一份，构造时确定，之后不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterLayout {
    /// 目标位置（写）
    pub target_position: Register,
    /// 当前位置（读）
    pub present_position: Register,
    /// 当前速度（读）
    pub present_speed: Register,
    /// 扭矩使能（写）
    pub torque_enable: Register,
    /// 位置环 P 系数（启动时可选写入）
    pub p_coefficient: Register,
}

impl RegisterLayout {
    /// STS3215 默认映射
    pub const fn sts3215() -> Self {
        Self {
            target_position: sts3215::GOAL_POSITION,
            present_position: sts3215::PRESENT_POSITION,
            present_speed: sts3215::PRESENT_SPEED,
            torque_enable: sts3215::TORQUE_ENABLE,
            p_coefficient: sts3215::P_COEFFICIENT,
        }
    }

    /// 当位置与速度寄存器地址相邻时，返回可一次读取二者的连续块 `(起始地址, 长度)`
    pub fn telemetry_block(&self) -> Option<(u8, u8)> {
        let pos = &self.present_position;
        let speed = &self.present_speed;
        if pos.end() == speed.address as u16 {
            Some((pos.address, pos.size + speed.size))
        } else {
            None
        }
    }
}

impl Default for RegisterLayout {
    fn default() -> Self {
        Self::sts3215()
    }
}
