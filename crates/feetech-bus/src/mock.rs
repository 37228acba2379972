//! 内存模拟舵机总线
//!
//! 每个舵机一块 256 字节控制表；记录所有写事务；可注入超时/损坏回复、
//! 设置离线舵机与事务延迟。`MockHandle` 可在传输被移入控制线程后继续观测与操控。

use crate::{BusError, Transport};
use feetech_protocol::{ActuatorId, ProtocolError, Register, sts3215};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// STS3215 型号编号
const STS3215_MODEL: i32 = 777;

/// 注入的故障类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    Timeout,
    Corrupt,
}

/// 记录的写事务
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockWrite {
    /// 单个寄存器写
    Single {
        id: ActuatorId,
        address: u8,
        value: i32,
    },
    /// 原始字节写
    Raw {
        id: ActuatorId,
        address: u8,
        data: Vec<u8>,
    },
    /// 同步写（一次事务）
    Sync {
        address: u8,
        entries: Vec<(ActuatorId, i32)>,
    },
}

impl MockWrite {
    pub fn address(&self) -> u8 {
        match self {
            MockWrite::Single { address, .. }
            | MockWrite::Raw { address, .. }
            | MockWrite::Sync { address, .. } => *address,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    memory: HashMap<ActuatorId, [u8; 256]>,
    offline: HashSet<ActuatorId>,
    writes: Vec<MockWrite>,
    faults: VecDeque<MockFault>,
    failing: Option<MockFault>,
    latency: Duration,
    mirror_goal: bool,
    transactions: u64,
    failed_transactions: u64,
}

impl MockState {
    fn write_bytes(&mut self, id: ActuatorId, address: u8, data: &[u8]) -> Result<(), BusError> {
        let mirror = self.mirror_goal && address == sts3215::GOAL_POSITION.address;
        let memory = self.memory.get_mut(&id).ok_or(BusError::Timeout { id })?;
        let start = address as usize;
        let end = start + data.len();
        if end > memory.len() {
            return Err(ProtocolError::PacketTooLarge(end).into());
        }
        memory[start..end].copy_from_slice(data);

        if mirror {
            let present = sts3215::PRESENT_POSITION.address as usize;
            let len = data.len().min(sts3215::PRESENT_POSITION.size as usize);
            memory[present..present + len].copy_from_slice(&data[..len]);
        }
        Ok(())
    }

    fn read_bytes(&self, id: ActuatorId, address: u8, len: u8) -> Result<Vec<u8>, BusError> {
        let memory = self.memory.get(&id).ok_or(BusError::Timeout { id })?;
        let start = address as usize;
        let end = start + len as usize;
        if end > memory.len() {
            return Err(ProtocolError::PacketTooLarge(end).into());
        }
        Ok(memory[start..end].to_vec())
    }
}

/// 观测与操控模拟总线的句柄
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 添加一个舵机（STS3215 默认值：位置居中，扭矩关闭）
    pub fn add_device(&self, id: ActuatorId) {
        let mut memory = [0u8; 256];
        for (register, value) in [
            (sts3215::MODEL, STS3215_MODEL),
            (sts3215::ID, id as i32),
            (sts3215::P_COEFFICIENT, 32),
            (sts3215::PRESENT_POSITION, 2048),
            (sts3215::GOAL_POSITION, 2048),
            (sts3215::PRESENT_VOLTAGE, 120),
            (sts3215::PRESENT_TEMPERATURE, 30),
        ] {
            if let Ok(bytes) = register.encode(value) {
                let start = register.address as usize;
                memory[start..start + bytes.len()].copy_from_slice(&bytes);
            }
        }
        self.lock().memory.insert(id, memory);
    }

    /// 直接设置寄存器值（不计入写记录）
    pub fn set_register(
        &self,
        id: ActuatorId,
        register: &Register,
        value: i32,
    ) -> Result<(), BusError> {
        let bytes = register.encode(value)?;
        let mut state = self.lock();
        let mirror = state.mirror_goal;
        state.mirror_goal = false;
        let result = state.write_bytes(id, register.address, &bytes);
        state.mirror_goal = mirror;
        result
    }

    /// 读取寄存器当前值
    pub fn register(&self, id: ActuatorId, register: &Register) -> Option<i32> {
        let state = self.lock();
        let bytes = state.read_bytes(id, register.address, register.size).ok()?;
        register.decode(&bytes).ok()
    }

    /// 全部写事务记录
    pub fn writes(&self) -> Vec<MockWrite> {
        self.lock().writes.clone()
    }

    /// 指定地址的写事务记录
    pub fn writes_to(&self, register: &Register) -> Vec<MockWrite> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.address() == register.address)
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// 接下来的 `count` 次事务失败
    pub fn fail_next(&self, count: usize, fault: MockFault) {
        self.lock().faults.extend(std::iter::repeat_n(fault, count));
    }

    /// 持续失败（`None` 恢复正常）
    pub fn set_failing(&self, fault: Option<MockFault>) {
        self.lock().failing = fault;
    }

    /// 设置舵机离线（不再回复）
    pub fn set_offline(&self, id: ActuatorId, offline: bool) {
        let mut state = self.lock();
        if offline {
            state.offline.insert(id);
        } else {
            state.offline.remove(&id);
        }
    }

    /// 每次事务的模拟耗时
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// 写入目标位置时同步更新当前位置（模拟舵机瞬间到位）
    pub fn set_mirror_goal(&self, mirror: bool) {
        self.lock().mirror_goal = mirror;
    }

    /// 事务总数（含失败）
    pub fn transactions(&self) -> u64 {
        self.lock().transactions
    }

    pub fn failed_transactions(&self) -> u64 {
        self.lock().failed_transactions
    }
}

/// 模拟总线传输
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    /// 创建包含指定舵机的模拟总线
    pub fn new(ids: &[ActuatorId]) -> Self {
        let handle = MockHandle::default();
        for &id in ids {
            handle.add_device(id);
        }
        Self { handle }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    /// 开始一次事务：模拟延迟、消耗注入的故障、检查舵机在线
    fn begin(&self, ids: &[ActuatorId]) -> Result<MutexGuard<'_, MockState>, BusError> {
        let latency = self.handle.lock().latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let mut state = self.handle.lock();
        state.transactions += 1;

        let first = ids.first().copied().unwrap_or_default();
        let fault = state.faults.pop_front().or(state.failing);
        let outcome = match fault {
            Some(MockFault::Timeout) => Err(BusError::Timeout { id: first }),
            Some(MockFault::Corrupt) => Err(ProtocolError::ChecksumMismatch {
                expected: 0x00,
                actual: 0xFF,
            }
            .into()),
            None => ids
                .iter()
                .find(|&&id| state.offline.contains(&id) || !state.memory.contains_key(&id))
                .map_or(Ok(()), |&id| Err(BusError::Timeout { id })),
        };

        match outcome {
            Ok(()) => Ok(state),
            Err(e) => {
                state.failed_transactions += 1;
                Err(e)
            },
        }
    }
}

impl Transport for MockTransport {
    fn ping(&mut self, id: ActuatorId) -> Result<(), BusError> {
        self.begin(&[id]).map(|_| ())
    }

    fn read_block(&mut self, id: ActuatorId, address: u8, len: u8) -> Result<Vec<u8>, BusError> {
        let state = self.begin(&[id])?;
        state.read_bytes(id, address, len)
    }

    fn write_block(&mut self, id: ActuatorId, address: u8, data: &[u8]) -> Result<(), BusError> {
        let mut state = self.begin(&[id])?;
        state.write_bytes(id, address, data)?;
        state.writes.push(MockWrite::Raw {
            id,
            address,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn write_register(
        &mut self,
        id: ActuatorId,
        register: &Register,
        value: i32,
    ) -> Result<(), BusError> {
        let bytes = register.encode(value)?;
        let mut state = self.begin(&[id])?;
        state.write_bytes(id, register.address, &bytes)?;
        state.writes.push(MockWrite::Single {
            id,
            address: register.address,
            value,
        });
        Ok(())
    }

    fn sync_write(&mut self, register: &Register, values: &[(ActuatorId, i32)]) -> Result<(), BusError> {
        let encoded = values
            .iter()
            .map(|&(id, value)| register.encode(value).map(|bytes| (id, bytes)))
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<ActuatorId> = values.iter().map(|(id, _)| *id).collect();
        let mut state = self.begin(&ids)?;
        for (id, bytes) in &encoded {
            state.write_bytes(*id, register.address, bytes)?;
        }
        state.writes.push(MockWrite::Sync {
            address: register.address,
            entries: values.to_vec(),
        });
        Ok(())
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
        let state = self.begin(ids)?;
        ids.iter().map(|&id| state.read_bytes(id, address, len)).collect()
    }
}
