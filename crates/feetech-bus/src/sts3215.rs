//! STS3215 直接寄存器访问
//!
//! 在没有控制器占用端口时使用（扫描、诊断、参数配置）。
//! 位置/速度以 [`PositionUnit`] 指定的单位收发。

use crate::{BusError, Transport};
use feetech_protocol::{ActuatorId, PositionUnit, ProtocolError, Register, sts3215};
use tracing::debug;

fn checked(register: &Register, raw: Option<i32>) -> Result<i32, BusError> {
    raw.ok_or_else(|| ProtocolError::NotRepresentable { register: register.name }.into())
}

/// STS3215 总线助手
pub struct Sts3215Bus<T: Transport> {
    transport: T,
    unit: PositionUnit,
}

impl<T: Transport> Sts3215Bus<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            unit: PositionUnit::default(),
        }
    }

    pub fn with_unit(mut self, unit: PositionUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn unit(&self) -> PositionUnit {
        self.unit
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn ping(&mut self, id: ActuatorId) -> Result<(), BusError> {
        self.transport.ping(id)
    }

    /// 逐个 PING，返回有回复的舵机
    pub fn scan(&mut self, ids: impl IntoIterator<Item = ActuatorId>) -> Vec<ActuatorId> {
        ids.into_iter()
            .filter(|&id| match self.transport.ping(id) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Scan: id {} did not answer: {}", id, e);
                    false
                },
            })
            .collect()
    }

    pub fn read(&mut self, id: ActuatorId, register: &Register) -> Result<i32, BusError> {
        self.transport.read_register(id, register)
    }

    pub fn write(&mut self, id: ActuatorId, register: &Register, value: i32) -> Result<(), BusError> {
        self.transport.write_register(id, register, value)
    }

    pub fn read_model(&mut self, id: ActuatorId) -> Result<u16, BusError> {
        Ok(self.read(id, &sts3215::MODEL)? as u16)
    }

    pub fn read_torque_enable(&mut self, id: ActuatorId) -> Result<bool, BusError> {
        Ok(self.read(id, &sts3215::TORQUE_ENABLE)? != 0)
    }

    pub fn write_torque_enable(&mut self, id: ActuatorId, enable: bool) -> Result<(), BusError> {
        self.write(id, &sts3215::TORQUE_ENABLE, enable as i32)
    }

    pub fn read_present_position(&mut self, id: ActuatorId) -> Result<f64, BusError> {
        let raw = self.read(id, &sts3215::PRESENT_POSITION)?;
        Ok(self.unit.position_from_raw(raw))
    }

    pub fn read_present_speed(&mut self, id: ActuatorId) -> Result<f64, BusError> {
        let raw = self.read(id, &sts3215::PRESENT_SPEED)?;
        Ok(self.unit.speed_from_raw(raw))
    }

    pub fn read_goal_position(&mut self, id: ActuatorId) -> Result<f64, BusError> {
        let raw = self.read(id, &sts3215::GOAL_POSITION)?;
        Ok(self.unit.position_from_raw(raw))
    }

    pub fn write_goal_position(&mut self, id: ActuatorId, position: f64) -> Result<(), BusError> {
        let raw = checked(&sts3215::GOAL_POSITION, self.unit.position_to_raw(position))?;
        self.write(id, &sts3215::GOAL_POSITION, raw)
    }

    pub fn write_goal_speed(&mut self, id: ActuatorId, speed: f64) -> Result<(), BusError> {
        let raw = checked(&sts3215::GOAL_SPEED, self.unit.speed_to_raw(speed))?;
        self.write(id, &sts3215::GOAL_SPEED, raw)
    }

    pub fn read_p_coefficient(&mut self, id: ActuatorId) -> Result<u8, BusError> {
        Ok(self.read(id, &sts3215::P_COEFFICIENT)? as u8)
    }

    pub fn write_p_coefficient(&mut self, id: ActuatorId, kp: u8) -> Result<(), BusError> {
        self.write(id, &sts3215::P_COEFFICIENT, kp as i32)
    }

    /// 温度（℃）
    pub fn read_present_temperature(&mut self, id: ActuatorId) -> Result<u8, BusError> {
        Ok(self.read(id, &sts3215::PRESENT_TEMPERATURE)? as u8)
    }

    /// 电压（V），寄存器单位 0.1V
    pub fn read_present_voltage(&mut self, id: ActuatorId) -> Result<f64, BusError> {
        Ok(self.read(id, &sts3215::PRESENT_VOLTAGE)? as f64 / 10.0)
    }

    pub fn read_present_load(&mut self, id: ActuatorId) -> Result<i32, BusError> {
        self.read(id, &sts3215::PRESENT_LOAD)
    }

    pub fn read_moving(&mut self, id: ActuatorId) -> Result<bool, BusError> {
        Ok(self.read(id, &sts3215::MOVING)? != 0)
    }

    pub fn sync_read_present_position(&mut self, ids: &[ActuatorId]) -> Result<Vec<f64>, BusError> {
        let raw = self.transport.sync_read(&sts3215::PRESENT_POSITION, ids)?;
        Ok(raw.into_iter().map(|r| self.unit.position_from_raw(r)).collect())
    }

    pub fn sync_read_present_speed(&mut self, ids: &[ActuatorId]) -> Result<Vec<f64>, BusError> {
        let raw = self.transport.sync_read(&sts3215::PRESENT_SPEED, ids)?;
        Ok(raw.into_iter().map(|r| self.unit.speed_from_raw(r)).collect())
    }

    pub fn sync_write_goal_position(&mut self, targets: &[(ActuatorId, f64)]) -> Result<(), BusError> {
        let raw = targets
            .iter()
            .map(|&(id, position)| {
                checked(&sts3215::GOAL_POSITION, self.unit.position_to_raw(position)).map(|raw| (id, raw))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.transport.sync_write(&sts3215::GOAL_POSITION, &raw)
    }

    pub fn sync_write_torque_enable(&mut self, ids: &[ActuatorId], enable: bool) -> Result<(), BusError> {
        let values: Vec<(ActuatorId, i32)> = ids.iter().map(|&id| (id, enable as i32)).collect();
        self.transport.sync_write(&sts3215::TORQUE_ENABLE, &values)
    }
}
