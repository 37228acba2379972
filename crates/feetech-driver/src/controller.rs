//! Controller 模块
//!
//! 对外的 `Controller` 结构体：提交目标、读取遥测缓存、扭矩开关与冻结。
//! 所有方法都不执行总线 I/O，总线只由控制线程访问。

use crate::command::{CommandMailbox, TargetVector, TorqueRequest};
use crate::error::{ConfigError, DriverError};
use crate::metrics::{ControllerMetrics, MetricsSnapshot};
use crate::mode::LoopState;
use crate::pipeline::LoopConfig;
use crate::registry::DeviceRegistry;
use crate::state::{ControllerContext, ControllerStatus, TelemetrySample};
use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError};
use feetech_protocol::{ActuatorId, PositionUnit};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{error, info, warn};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // Watchdog thread joins the target so the caller can wait with a timeout
        spawn(move || {
            let result = self.join();
            // Receiver may have timed out already
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

fn is_join_timeout(payload: &(dyn std::any::Any + Send)) -> bool {
    payload
        .downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::TimedOut)
}

/// 舵机控制器（对外 API）
///
/// 由 [`ControllerBuilder`](crate::ControllerBuilder) 构造。`Controller` 是
/// `Send + Sync`，可以放进 `Arc` 在多个线程间共享。
///
/// # Example
///
/// ```no_run
/// use feetech_driver::ControllerBuilder;
///
/// let controller = ControllerBuilder::new()
///     .port("/dev/ttyACM0")
///     .ids(vec![1, 2, 3])
///     .frequency_hz(500.0)
///     .build()
///     .unwrap();
///
/// controller.set_new_target(&[0.0, 0.5, -0.5]).unwrap();
/// let positions = controller.get_present_position();
/// controller.freeze().unwrap();
/// controller.shutdown().unwrap();
/// ```
pub struct Controller {
    registry: Arc<DeviceRegistry>,
    ctx: Arc<ControllerContext>,
    commands: Arc<CommandMailbox>,
    metrics: Arc<ControllerMetrics>,
    /// 扭矩请求队列发送端（容量 10，FIFO）
    torque_tx: Sender<TorqueRequest>,
    is_running: Arc<AtomicBool>,
    /// 控制线程句柄（shutdown 时 take 并 join）
    loop_thread: Mutex<Option<JoinHandle<()>>>,
    unit: PositionUnit,
    config: LoopConfig,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("ids", &self.registry.ids())
            .field("state", &self.ctx.loop_state.get(Ordering::Acquire))
            .field("unit", &self.unit)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// 构造 `Controller` 所需的各部分（由 builder 组装）
pub(crate) struct ControllerParts {
    pub registry: Arc<DeviceRegistry>,
    pub ctx: Arc<ControllerContext>,
    pub commands: Arc<CommandMailbox>,
    pub metrics: Arc<ControllerMetrics>,
    pub torque_tx: Sender<TorqueRequest>,
    pub is_running: Arc<AtomicBool>,
    pub loop_thread: JoinHandle<()>,
    pub unit: PositionUnit,
    pub config: LoopConfig,
}

impl Controller {
    pub(crate) fn from_parts(parts: ControllerParts) -> Self {
        Self {
            registry: parts.registry,
            ctx: parts.ctx,
            commands: parts.commands,
            metrics: parts.metrics,
            torque_tx: parts.torque_tx,
            is_running: parts.is_running,
            loop_thread: Mutex::new(Some(parts.loop_thread)),
            unit: parts.unit,
            config: parts.config,
        }
    }

    /// 控制循环已停止时返回对应错误（链路失败优先）
    fn ensure_running(&self) -> Result<(), DriverError> {
        if let Some(failure) = self.ctx.link_failure.load_full() {
            return Err(DriverError::LinkFailure {
                consecutive_failures: failure.consecutive_failures,
                last_error: failure.last_error.clone(),
            });
        }
        if !self.is_running.load(Ordering::Acquire)
            || self.ctx.loop_state.get(Ordering::Acquire).is_terminal()
        {
            return Err(DriverError::Stopped);
        }
        Ok(())
    }

    fn check_len(&self, actual: usize) -> Result<(), DriverError> {
        let expected = self.registry.len();
        if actual != expected {
            return Err(ConfigError::LengthMismatch { expected, actual }.into());
        }
        Ok(())
    }

    /// 按各舵机的目标寄存器检查原始值，整个向量要么全部有效，要么不提交
    fn check_targets(
        &self,
        values: impl Iterator<Item = (f64, Option<i32>)>,
    ) -> Result<TargetVector, ConfigError> {
        self.registry
            .iter()
            .zip(values)
            .map(|((_, id, layout), (value, raw))| {
                raw.filter(|&raw| layout.target_position.encode(raw).is_ok())
                    .ok_or(ConfigError::InvalidTarget { id, value })
            })
            .collect()
    }

    /// 提交新目标（用户单位，按配置顺序）
    ///
    /// 不阻塞：目标进入单槽邮箱，控制循环下一周期写出；
    /// 未被取走的旧目标会被覆盖（Last Write Wins）。
    ///
    /// # 错误
    /// - `ConfigError::LengthMismatch`: 长度与舵机数不一致
    /// - `ConfigError::InvalidTarget`: NaN、无穷或超出目标寄存器范围
    /// - `DriverError::LinkFailure` / `DriverError::Stopped`: 控制循环已停止
    pub fn set_new_target(&self, targets: &[f64]) -> Result<(), DriverError> {
        self.check_len(targets.len())?;
        let raw = self.check_targets(targets.iter().map(|&v| (v, self.unit.position_to_raw(v))))?;
        self.submit(raw)
    }

    /// 提交新目标（原始寄存器值）
    pub fn set_new_target_raw(&self, targets: &[i32]) -> Result<(), DriverError> {
        self.check_len(targets.len())?;
        let raw = self.check_targets(targets.iter().map(|&v| (v as f64, Some(v))))?;
        self.submit(raw)
    }

    fn submit(&self, targets: TargetVector) -> Result<(), DriverError> {
        self.ensure_running()?;

        let overwritten = self.commands.submit(targets).inspect_err(|_| {
            error!("Command mailbox lock poisoned, control loop may have panicked");
        })?;

        let total = self.metrics.commands_submitted.fetch_add(1, Ordering::Relaxed) + 1;
        if overwritten {
            let overwrites = self.metrics.command_overwrites.fetch_add(1, Ordering::Relaxed) + 1;

            // 每 1000 次提交检查一次覆盖率
            if total.is_multiple_of(1000) {
                let rate = (overwrites as f64 / total as f64) * 100.0;
                if rate > 50.0 {
                    warn!(
                        "High command overwrite rate detected: {:.1}% ({} overwrites / {} submissions). \
                         This may indicate a slow bus or a submit rate far above the loop frequency.",
                        rate, overwrites, total
                    );
                } else if rate > 30.0 {
                    info!(
                        "Moderate command overwrite rate: {:.1}% ({} overwrites / {} submissions). \
                         This is normal when submitting faster than the loop frequency.",
                        rate, overwrites, total
                    );
                }
            }
        }
        Ok(())
    }

    /// 当前位置（用户单位，配置顺序；`None` 表示尚未读到）
    ///
    /// 只读缓存，不等待总线。
    pub fn get_present_position(&self) -> Vec<Option<f64>> {
        self.samples()
            .map(|s| s.position().map(|raw| self.unit.position_from_raw(raw)))
            .collect()
    }

    /// 当前速度（用户单位/秒，配置顺序；`None` 表示尚未读到）
    pub fn get_current_speed(&self) -> Vec<Option<f64>> {
        self.samples()
            .map(|s| s.speed().map(|raw| self.unit.speed_from_raw(raw)))
            .collect()
    }

    /// 当前位置（原始寄存器值）
    pub fn get_present_position_raw(&self) -> Vec<Option<i32>> {
        self.samples().map(|s| s.position()).collect()
    }

    fn samples(&self) -> impl Iterator<Item = TelemetrySample> + '_ {
        (0..self.registry.len()).map(|i| self.ctx.telemetry.read(i))
    }

    /// 完整遥测样本（含序号与时间戳）
    pub fn telemetry(&self) -> Vec<TelemetrySample> {
        self.ctx.telemetry.snapshot()
    }

    pub fn telemetry_for(&self, id: ActuatorId) -> Option<TelemetrySample> {
        self.registry.index_of(id).map(|i| self.ctx.telemetry.read(i))
    }

    /// 使能所有舵机扭矩，等待控制循环应答
    pub fn enable_torque(&self) -> Result<(), DriverError> {
        self.request_torque(true)
    }

    /// 关闭所有舵机扭矩，等待控制循环应答
    ///
    /// 之后的目标写入不会重新使能扭矩。
    pub fn disable_torque(&self) -> Result<(), DriverError> {
        self.request_torque(false)
    }

    fn request_torque(&self, enable: bool) -> Result<(), DriverError> {
        self.ensure_running()?;

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.torque_tx
            .try_send(TorqueRequest {
                enable,
                ack: ack_tx,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => DriverError::ChannelFull,
                TrySendError::Disconnected(_) => DriverError::ChannelClosed,
            })?;

        match ack_rx.recv_timeout(self.config.effective_ack_timeout()) {
            Ok(result) => result.map_err(DriverError::from),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Torque request not acknowledged within {:?}",
                    self.config.effective_ack_timeout()
                );
                Err(DriverError::Timeout)
            },
            // 控制循环在应用请求前退出
            Err(RecvTimeoutError::Disconnected) => {
                self.ensure_running()?;
                Err(DriverError::Stopped)
            },
        }
    }

    /// 每个舵机最近一次成功写入的扭矩状态
    pub fn torque_enabled(&self) -> Vec<bool> {
        self.ctx.torque_states()
    }

    /// 冻结：以缓存中的当前位置作为新目标
    ///
    /// 不改变扭矩状态。任一舵机尚无遥测时返回
    /// `DriverError::TelemetryUnavailable`，不提交任何目标。
    pub fn freeze(&self) -> Result<(), DriverError> {
        self.ensure_running()?;

        let mut targets = TargetVector::with_capacity(self.registry.len());
        for (index, id, _) in self.registry.iter() {
            let position = self
                .ctx
                .telemetry
                .read(index)
                .position()
                .ok_or(DriverError::TelemetryUnavailable { id })?;
            targets.push(position);
        }
        self.submit(targets)?;
        info!("Freeze: holding current positions");
        Ok(())
    }

    /// 控制器状态（循环状态、降级标志、链路失败信息）
    pub fn status(&self) -> ControllerStatus {
        self.ctx.status()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// 舵机 ID（配置顺序）
    pub fn ids(&self) -> &[ActuatorId] {
        self.registry.ids()
    }

    pub fn position_unit(&self) -> PositionUnit {
        self.unit
    }

    pub fn loop_config(&self) -> &LoopConfig {
        &self.config
    }

    /// 链路是否存活（最近一次成功遥测在 `link_timeout` 之内）
    pub fn is_link_alive(&self) -> bool {
        self.ctx.link.is_alive()
    }

    pub fn time_since_last_telemetry(&self) -> Duration {
        self.ctx.link.time_since_last_success()
    }

    /// 停止控制循环并等待线程退出（最多 `join_timeout`）
    ///
    /// 可重复调用。舵机保持最后一次写入的扭矩与目标。
    pub fn shutdown(&self) -> Result<(), DriverError> {
        // Release: 之前的写入对控制线程可见
        self.is_running.store(false, Ordering::Release);

        let handle = self.loop_thread.lock().map_err(|_| DriverError::PoisonedLock)?.take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.join_timeout(self.config.join_timeout) {
            Ok(()) => {
                info!("Controller shut down");
                Ok(())
            },
            Err(payload) if is_join_timeout(payload.as_ref()) => {
                error!(
                    "Control loop failed to shut down within {:?}",
                    self.config.join_timeout
                );
                Err(DriverError::Timeout)
            },
            Err(_) => {
                error!("Control loop thread panicked");
                self.ctx.loop_state.set(LoopState::Stopped, Ordering::Release);
                Err(DriverError::LoopThread("control loop thread panicked".to_string()))
            },
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // 错误已在 shutdown 中记录
        let _ = self.shutdown();
    }
}
