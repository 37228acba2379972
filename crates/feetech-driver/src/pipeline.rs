//! 控制循环
//!
//! 专用线程独占传输，按固定周期执行：
//!
//! 0. 应用待处理的扭矩请求（FIFO，逐个应答）
//! 1. 取出最新目标向量并写出（统一映射时使用同步写）
//! 2. 批量读取位置与速度（相邻时一次块读取）
//! 3. 发布到遥测缓存
//!
//! 任一步骤失败计为一次失败迭代；连续失败达到阈值后记录链路失败并退出。
//! 通信错误从不改变扭矩状态，也不会产生新的运动目标。

use crate::command::TorqueRequest;
use crate::error::ConfigError;
use crate::heartbeat::monotonic_micros;
use crate::metrics::ControllerMetrics;
use crate::mode::LoopState;
use crate::registry::DeviceRegistry;
use crate::state::{ControllerContext, LinkFailureInfo};
use crossbeam_channel::Receiver;
use feetech_bus::{BusError, Transport};
use feetech_protocol::{ActuatorId, ProtocolError, RegisterLayout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 控制循环配置
///
/// # Example
///
/// ```
/// use feetech_driver::LoopConfig;
/// use std::time::Duration;
///
/// // 默认 500Hz
/// let config = LoopConfig::default();
/// assert_eq!(config.period, Duration::from_millis(2));
///
/// let config = LoopConfig::from_frequency(100.0).unwrap();
/// assert_eq!(config.period, Duration::from_millis(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopConfig {
    /// 控制周期
    pub period: Duration,
    /// 连续失败迭代数达到此值时判定链路失败
    pub max_consecutive_failures: u32,
    /// 启动时写入的扭矩状态
    pub initial_torque: bool,
    /// 启动步骤失败后的重试次数
    pub startup_retries: u32,
    /// 等待扭矩请求应答的时间
    pub torque_ack_timeout: Duration,
    /// 关闭时等待控制线程退出的时间
    pub join_timeout: Duration,
    /// 超过此时间没有成功遥测视为链路中断（仅用于 `is_link_alive`）
    pub link_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(2),
            max_consecutive_failures: 10,
            initial_torque: true,
            startup_retries: 3,
            torque_ack_timeout: Duration::from_millis(500),
            join_timeout: Duration::from_secs(2),
            link_timeout: Duration::from_millis(100),
        }
    }
}

impl LoopConfig {
    /// 以频率（Hz）指定周期
    pub fn from_frequency(hz: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            period: period_from_frequency(hz)?,
            ..Self::default()
        })
    }

    pub fn frequency_hz(&self) -> f64 {
        1.0 / self.period.as_secs_f64()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period.is_zero() {
            return Err(ConfigError::InvalidFrequency(f64::INFINITY));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidThreshold(0));
        }
        Ok(())
    }

    /// 扭矩应答的实际等待时间：至少覆盖两个周期
    pub(crate) fn effective_ack_timeout(&self) -> Duration {
        self.torque_ack_timeout.max(self.period * 2)
    }
}

pub(crate) fn period_from_frequency(hz: f64) -> Result<Duration, ConfigError> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(ConfigError::InvalidFrequency(hz));
    }
    Duration::try_from_secs_f64(1.0 / hz).map_err(|_| ConfigError::InvalidFrequency(hz))
}

fn record_error(metrics: &ControllerMetrics, e: &BusError) {
    metrics.transaction_failures.fetch_add(1, Ordering::Relaxed);
    if e.is_timeout() {
        metrics.timeouts.fetch_add(1, Ordering::Relaxed);
    } else if e.is_corrupt() {
        metrics.corrupt_replies.fetch_add(1, Ordering::Relaxed);
    }
}

fn note_failure(metrics: &ControllerMetrics, e: &BusError) -> (String, bool) {
    record_error(metrics, e);
    (e.to_string(), e.is_fatal())
}

/// 将同一寄存器的值写入所有舵机（统一映射时一次同步写）
fn write_all<T: Transport + ?Sized>(
    transport: &mut T,
    registry: &DeviceRegistry,
    register: impl Fn(&RegisterLayout) -> feetech_protocol::Register,
    values: &[i32],
) -> Result<(), BusError> {
    if let Some(layout) = registry.shared_layout() {
        let entries: Vec<(ActuatorId, i32)> =
            registry.ids().iter().copied().zip(values.iter().copied()).collect();
        return transport.sync_write(&register(layout), &entries);
    }

    // 映射不一致：逐个写，单个失败不阻止其余舵机
    let mut first_error = None;
    for ((_, id, layout), &value) in registry.iter().zip(values) {
        if let Err(e) = transport.write_register(id, &register(layout), value) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// 目标值能否编码进各舵机的目标寄存器
fn check_encodable(registry: &DeviceRegistry, targets: &[i32]) -> Result<(), ProtocolError> {
    for ((_, _, layout), &value) in registry.iter().zip(targets) {
        layout.target_position.encode(value)?;
    }
    Ok(())
}

fn decode_block(layout: &RegisterLayout, block: &[u8]) -> Result<(i32, i32), BusError> {
    let split = layout.present_position.size as usize;
    if block.len() < split {
        return Err(feetech_protocol::ProtocolError::InvalidLength {
            expected: split,
            actual: block.len(),
        }
        .into());
    }
    let (pos, speed) = block.split_at(split);
    Ok((
        layout.present_position.decode(pos)?,
        layout.present_speed.decode(speed)?,
    ))
}

fn read_one<T: Transport + ?Sized>(
    transport: &mut T,
    id: ActuatorId,
    layout: &RegisterLayout,
) -> Result<(i32, i32), BusError> {
    match layout.telemetry_block() {
        Some((address, len)) => decode_block(layout, &transport.read_block(id, address, len)?),
        None => Ok((
            transport.read_register(id, &layout.present_position)?,
            transport.read_register(id, &layout.present_speed)?,
        )),
    }
}

/// 读取并发布遥测
///
/// 统一映射：整批读取，整批发布（整批失败则不发布任何样本）。
/// 映射不一致：逐个读取，成功的舵机各自发布。
fn read_telemetry<T: Transport + ?Sized>(
    transport: &mut T,
    registry: &DeviceRegistry,
    ctx: &ControllerContext,
    metrics: &ControllerMetrics,
) -> Result<(), BusError> {
    let publish = |index: usize, (position, speed): (i32, i32)| {
        let next = ctx.telemetry.read(index).next(position, speed, monotonic_micros());
        ctx.telemetry.publish(index, next);
        metrics.telemetry_publishes.fetch_add(1, Ordering::Relaxed);
    };

    if let Some(layout) = registry.shared_layout() {
        let ids = registry.ids();
        let samples: Vec<(i32, i32)> = match layout.telemetry_block() {
            Some((address, len)) => transport
                .sync_read_block(address, len, ids)?
                .iter()
                .map(|block| decode_block(layout, block))
                .collect::<Result<_, _>>()?,
            None => {
                let positions = transport.sync_read(&layout.present_position, ids)?;
                let speeds = transport.sync_read(&layout.present_speed, ids)?;
                positions.into_iter().zip(speeds).collect()
            },
        };
        metrics.transactions_ok.fetch_add(1, Ordering::Relaxed);

        for (index, sample) in samples.into_iter().enumerate() {
            publish(index, sample);
        }
        ctx.link.register_success();
        return Ok(());
    }

    let mut first_error = None;
    for (index, id, layout) in registry.iter() {
        match read_one(transport, id, layout) {
            Ok(sample) => {
                metrics.transactions_ok.fetch_add(1, Ordering::Relaxed);
                publish(index, sample);
                ctx.link.register_success();
            },
            Err(e) => {
                record_error(metrics, &e);
                trace!("Control loop: telemetry read from id {} failed: {}", id, e);
                first_error.get_or_insert(e);
            },
        }
    }

    match first_error {
        // 逐个路径的失败已单独计数
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// 启动步骤：PING 所有舵机、写入初始 P 系数、应用初始扭矩状态
///
/// 失败时按 `startup_retries` 重试，全部失败则返回最后一次错误。
pub fn startup<T: Transport + ?Sized>(
    transport: &mut T,
    registry: &DeviceRegistry,
    init_kps: Option<&[u8]>,
    ctx: &ControllerContext,
    metrics: &ControllerMetrics,
    config: &LoopConfig,
) -> Result<(), BusError> {
    let mut attempt = 0;
    loop {
        match startup_once(transport, registry, init_kps, config) {
            Ok(()) => break,
            Err(e) if attempt < config.startup_retries => {
                record_error(metrics, &e);
                attempt += 1;
                warn!(
                    "Control loop: startup attempt {} failed: {}, retrying",
                    attempt, e
                );
            },
            Err(e) => {
                record_error(metrics, &e);
                error!("Control loop: startup failed after {} attempt(s): {}", attempt + 1, e);
                return Err(e);
            },
        }
    }

    ctx.set_torque_all(config.initial_torque);
    info!(
        "Control loop: {} actuator(s) ready, torque {}",
        registry.len(),
        if config.initial_torque { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn startup_once<T: Transport + ?Sized>(
    transport: &mut T,
    registry: &DeviceRegistry,
    init_kps: Option<&[u8]>,
    config: &LoopConfig,
) -> Result<(), BusError> {
    for &id in registry.ids() {
        transport.ping(id)?;
    }

    if let Some(kps) = init_kps {
        let kps: Vec<i32> = kps.iter().map(|&kp| kp as i32).collect();
        write_all(transport, registry, |layout| layout.p_coefficient, &kps)?;
        debug!("Control loop: initial P coefficients written: {:?}", kps);
    }

    let torque = vec![config.initial_torque as i32; registry.len()];
    write_all(transport, registry, |layout| layout.torque_enable, &torque)
}

/// 控制循环主体
///
/// # 参数
/// - `transport`: 总线传输（由本线程独占，退出时释放）
/// - `registry`: 设备注册表
/// - `torque_rx`: 扭矩请求队列接收端
/// - `ctx`: 共享上下文（遥测缓存、状态、链路监测、目标邮箱由调用方持有）
/// - `commands`: 目标向量邮箱
/// - `metrics`: 性能指标
/// - `is_running`: 运行标志（关闭时置为 false）
#[allow(clippy::too_many_arguments)]
pub fn control_loop<T: Transport>(
    mut transport: T,
    registry: Arc<DeviceRegistry>,
    torque_rx: Receiver<TorqueRequest>,
    ctx: Arc<ControllerContext>,
    commands: Arc<crate::command::CommandMailbox>,
    metrics: Arc<ControllerMetrics>,
    is_running: Arc<AtomicBool>,
    config: LoopConfig,
) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => info!("Control loop: thread priority set to MAX (realtime)"),
            Err(e) => warn!(
                "Control loop: failed to set thread priority: {:?}. \
                 On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                e
            ),
        }
    }

    ctx.loop_state.set(LoopState::Running, Ordering::Release);
    info!(
        "Control loop: running at {:.1} Hz for ids {:?} (sync: {})",
        config.frequency_hz(),
        registry.ids(),
        registry.is_uniform()
    );

    let mut consecutive_failures: u32 = 0;
    let mut next_deadline = Instant::now();

    loop {
        // Acquire: 看到 false 时，关闭方之前的写入均可见
        if !is_running.load(Ordering::Acquire) {
            trace!("Control loop: is_running flag is false, exiting");
            break;
        }

        // 本周期的失败（错误描述，是否端口级错误）
        let mut last_error: Option<(String, bool)> = None;

        // 0. 扭矩请求（先于目标写入）
        while let Ok(request) = torque_rx.try_recv() {
            let values = vec![request.enable as i32; registry.len()];
            let result =
                write_all(&mut transport, &registry, |layout| layout.torque_enable, &values);
            match &result {
                Ok(()) => {
                    ctx.set_torque_all(request.enable);
                    metrics.transactions_ok.fetch_add(1, Ordering::Relaxed);
                    metrics.torque_writes.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "Control loop: torque {}",
                        if request.enable { "enabled" } else { "disabled" }
                    );
                },
                Err(e) => {
                    warn!("Control loop: torque write failed: {}", e);
                    last_error = Some(note_failure(&metrics, e));
                },
            }
            // 调用方可能已超时放弃等待
            let _ = request.ack.send(result);
        }

        // 1. 目标向量
        match commands.take_latest() {
            Ok(Some(targets)) => {
                if let Err(e) = check_encodable(&registry, &targets) {
                    // 命令错误而非链路错误：丢弃，不重试，不计入连续失败
                    warn!("Control loop: dropping target vector {:?}: {}", targets, e);
                    metrics.rejected_targets.fetch_add(1, Ordering::Relaxed);
                } else {
                    match write_all(
                        &mut transport,
                        &registry,
                        |layout| layout.target_position,
                        &targets,
                    ) {
                        Ok(()) => {
                            metrics.transactions_ok.fetch_add(1, Ordering::Relaxed);
                            metrics.target_writes.fetch_add(1, Ordering::Relaxed);
                        },
                        Err(e) => {
                            debug!("Control loop: target write failed: {}", e);
                            last_error = Some(note_failure(&metrics, &e));
                            // 仅在期间没有更新目标时放回，下周期重试
                            if commands.requeue_if_empty(targets).is_err() {
                                error!("Control loop: command mailbox lock poisoned, stopping");
                                break;
                            }
                        },
                    }
                }
            },
            Ok(None) => {},
            Err(_) => {
                // 锁已中毒，之后的目标都无法取出
                error!("Control loop: command mailbox lock poisoned, stopping");
                break;
            },
        }

        // 2 + 3. 遥测（逐个读取路径已自行计数）
        if let Err(e) = read_telemetry(&mut transport, &registry, &ctx, &metrics) {
            trace!("Control loop: telemetry read failed: {}", e);
            if registry.is_uniform() {
                last_error = Some(note_failure(&metrics, &e));
            } else {
                last_error = Some((e.to_string(), e.is_fatal()));
            }
        }

        metrics.iterations.fetch_add(1, Ordering::Relaxed);

        match last_error {
            None => {
                if consecutive_failures > 0 {
                    consecutive_failures = 0;
                    ctx.consecutive_failures.store(0, Ordering::Relaxed);
                }
                if ctx.degraded.swap(false, Ordering::Relaxed) {
                    info!("Control loop: link recovered");
                }
            },
            Some((message, fatal)) => {
                consecutive_failures += 1;
                ctx.consecutive_failures.store(consecutive_failures, Ordering::Relaxed);
                if !ctx.degraded.swap(true, Ordering::Relaxed) {
                    warn!("Control loop: degraded: {}", message);
                }
                if fatal {
                    warn!("Control loop: port-level error: {}", message);
                }

                if consecutive_failures >= config.max_consecutive_failures {
                    error!(
                        "Control loop: link failure after {} consecutive failed iterations: {}",
                        consecutive_failures, message
                    );
                    ctx.link_failure.store(Some(Arc::new(LinkFailureInfo {
                        consecutive_failures,
                        last_error: message,
                    })));
                    break;
                }
            },
        }

        // 基于截止时间的周期调度；超时后以当前时间重新锚定，不累积积压
        next_deadline += config.period;
        let now = Instant::now();
        if next_deadline > now {
            spin_sleep::sleep(next_deadline - now);
        } else {
            metrics.overruns.fetch_add(1, Ordering::Relaxed);
            next_deadline = now;
        }
    }

    ctx.loop_state.set(LoopState::Stopping, Ordering::Release);
    drop(torque_rx);
    drop(transport);
    ctx.loop_state.set(LoopState::Stopped, Ordering::Release);
    info!("Control loop: stopped, transport released");
}
