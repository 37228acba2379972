//! Builder 模式实现
//!
//! 提供链式构造 `Controller` 实例的便捷方式。

use crate::command::{CommandMailbox, TORQUE_QUEUE_CAPACITY};
use crate::controller::{Controller, ControllerParts};
use crate::error::{ConfigError, DriverError};
use crate::metrics::ControllerMetrics;
use crate::mode::LoopState;
use crate::pipeline::{LoopConfig, control_loop, period_from_frequency, startup};
use crate::registry::DeviceRegistry;
use crate::state::ControllerContext;
use feetech_bus::{BusError, Transport};
use feetech_protocol::{ActuatorId, PositionUnit, RegisterLayout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// 默认串口
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

/// 默认波特率（STS3215 出厂设置）
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

fn default_layouts() -> Vec<RegisterLayout> {
    vec![RegisterLayout::sts3215()]
}

/// 控制器配置
///
/// 启用 `serde` feature 后可从配置文件读取，缺省字段取默认值。
/// 寄存器映射不参与序列化，反序列化时使用 STS3215 默认映射。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    /// 串口设备路径
    pub port: String,
    pub baud_rate: u32,
    /// 舵机 ID（配置顺序即所有向量的顺序）
    pub ids: Vec<ActuatorId>,
    /// 寄存器映射：每个舵机一个，或只给一个由所有舵机共享
    #[cfg_attr(feature = "serde", serde(skip, default = "default_layouts"))]
    pub layouts: Vec<RegisterLayout>,
    /// 用户单位
    pub position_unit: PositionUnit,
    /// 启动时写入的 P 系数（每个舵机一个）
    pub init_kps: Option<Vec<u8>>,
    /// 单次总线事务的超时
    pub transaction_timeout: Duration,
    pub loop_config: LoopConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            ids: Vec::new(),
            layouts: default_layouts(),
            position_unit: PositionUnit::default(),
            init_kps: None,
            transaction_timeout: Duration::from_millis(20),
            loop_config: LoopConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// 校验配置并解析设备注册表
    pub fn validate(&self) -> Result<DeviceRegistry, ConfigError> {
        self.loop_config.validate()?;
        let registry = DeviceRegistry::new(self.ids.clone(), self.layouts.clone())?;
        if let Some(kps) = &self.init_kps
            && kps.len() != registry.len()
        {
            return Err(ConfigError::LengthMismatch {
                expected: registry.len(),
                actual: kps.len(),
            });
        }
        Ok(registry)
    }
}

/// Controller Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use feetech_driver::{ControllerBuilder, PositionUnit};
///
/// let controller = ControllerBuilder::new()
///     .port("/dev/ttyUSB0")
///     .baud_rate(1_000_000)
///     .ids(vec![1, 2, 3, 4, 5, 6])
///     .frequency_hz(200.0)
///     .position_unit(PositionUnit::Degrees)
///     .init_kps(vec![16; 6])
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct ControllerBuilder {
    config: ControllerConfig,
    /// 链式调用中出现的第一个参数错误，延迟到 build 时返回
    error: Option<ConfigError>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从完整配置开始
    pub fn from_config(config: ControllerConfig) -> Self {
        Self {
            config,
            error: None,
        }
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.config.port = port.into();
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    /// 控制频率（Hz）
    pub fn frequency_hz(mut self, hz: f64) -> Self {
        match period_from_frequency(hz) {
            Ok(period) => self.config.loop_config.period = period,
            Err(e) => {
                self.error.get_or_insert(e);
            },
        }
        self
    }

    /// 控制周期
    pub fn period(mut self, period: Duration) -> Self {
        self.config.loop_config.period = period;
        self
    }

    pub fn ids(mut self, ids: Vec<ActuatorId>) -> Self {
        self.config.ids = ids;
        self
    }

    /// 每个舵机一个寄存器映射
    pub fn layouts(mut self, layouts: Vec<RegisterLayout>) -> Self {
        self.config.layouts = layouts;
        self
    }

    /// 所有舵机共享同一寄存器映射
    pub fn shared_layout(mut self, layout: RegisterLayout) -> Self {
        self.config.layouts = vec![layout];
        self
    }

    pub fn position_unit(mut self, unit: PositionUnit) -> Self {
        self.config.position_unit = unit;
        self
    }

    pub fn init_kps(mut self, kps: Vec<u8>) -> Self {
        self.config.init_kps = Some(kps);
        self
    }

    /// 替换整个循环配置（会覆盖之前设置的频率）
    pub fn loop_config(mut self, config: LoopConfig) -> Self {
        self.config.loop_config = config;
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.config.transaction_timeout = timeout;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// 打开串口并启动控制器
    ///
    /// # 错误
    /// - `DriverError::Config`: 参数非法
    /// - `DriverError::Bus(BusError::OpenFailed)`: 串口打开失败
    /// - `DriverError::Bus(..)`: 启动步骤（PING、P 系数、扭矩）失败
    #[cfg(feature = "serial")]
    pub fn build(self) -> Result<Controller, DriverError> {
        if let Some(e) = &self.error {
            return Err(e.clone().into());
        }
        // 先校验，避免无效配置也去打开串口
        self.config.validate()?;

        let transport = feetech_bus::SerialTransport::open(
            &self.config.port,
            self.config.baud_rate,
            self.config.transaction_timeout,
        )?;
        info!(
            "Opened {} at {} baud",
            self.config.port, self.config.baud_rate
        );
        self.build_with_transport(transport)
    }

    /// 使用给定传输启动控制器（测试与自定义后端）
    pub fn build_with_transport<T: Transport + 'static>(
        self,
        transport: T,
    ) -> Result<Controller, DriverError> {
        if let Some(e) = &self.error {
            return Err(e.clone().into());
        }
        let ControllerConfig {
            position_unit,
            init_kps,
            loop_config,
            ..
        } = self.config.clone();
        let registry = Arc::new(self.config.validate()?);

        let ctx = Arc::new(ControllerContext::new(registry.len(), loop_config.link_timeout));
        let commands = Arc::new(CommandMailbox::new());
        let metrics = Arc::new(ControllerMetrics::new());
        let is_running = Arc::new(AtomicBool::new(true));
        let (torque_tx, torque_rx) = crossbeam_channel::bounded(TORQUE_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), BusError>>(1);

        let loop_thread = {
            let registry = registry.clone();
            let ctx = ctx.clone();
            let commands = commands.clone();
            let metrics = metrics.clone();
            let is_running = is_running.clone();
            let loop_config = loop_config.clone();

            thread::Builder::new()
                .name("feetech-control".to_string())
                .spawn(move || {
                    let mut transport = transport;
                    if let Err(e) = startup(
                        &mut transport,
                        &registry,
                        init_kps.as_deref(),
                        &ctx,
                        &metrics,
                        &loop_config,
                    ) {
                        ctx.loop_state.set(LoopState::Stopped, Ordering::Release);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    control_loop(
                        transport,
                        registry,
                        torque_rx,
                        ctx,
                        commands,
                        metrics,
                        is_running,
                        loop_config,
                    );
                })
                .map_err(|e| DriverError::LoopThread(e.to_string()))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("Control loop thread started");
                Ok(Controller::from_parts(ControllerParts {
                    registry,
                    ctx,
                    commands,
                    metrics,
                    torque_tx,
                    is_running,
                    loop_thread,
                    unit: position_unit,
                    config: loop_config,
                }))
            },
            Ok(Err(e)) => {
                // 线程已自行返回，不会留下部分构造的控制器
                let _ = loop_thread.join();
                Err(e.into())
            },
            Err(_) => {
                error!("Control loop thread exited before reporting startup result");
                let _ = loop_thread.join();
                Err(DriverError::LoopThread(
                    "control loop thread panicked during startup".to_string(),
                ))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feetech_bus::{MockFault, MockTransport, MockWrite};
    use feetech_protocol::sts3215;

    #[test]
    fn test_config_default() {
        let config = ControllerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.baud_rate, 1_000_000);
        assert_eq!(config.layouts, vec![RegisterLayout::sts3215()]);
        assert!(matches!(config.validate(), Err(ConfigError::Empty)));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde() {
        let config = ControllerConfig {
            ids: vec![1, 2],
            init_kps: Some(vec![16, 24]),
            position_unit: PositionUnit::Degrees,
            ..ControllerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("layouts"));
        let back: ControllerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        // 缺省字段取默认值
        let partial: ControllerConfig = serde_json::from_str(r#"{"ids": [3], "baud_rate": 500000}"#).unwrap();
        assert_eq!(partial.ids, vec![3]);
        assert_eq!(partial.baud_rate, 500_000);
        assert_eq!(partial.port, DEFAULT_PORT);
        assert_eq!(partial.layouts, vec![RegisterLayout::sts3215()]);
        assert_eq!(partial.loop_config, LoopConfig::default());
    }

    #[test]
    fn test_init_kps_length_checked() {
        let err = ControllerBuilder::new()
            .ids(vec![1, 2])
            .init_kps(vec![16])
            .build_with_transport(MockTransport::new(&[1, 2]))
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::Config(ConfigError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_invalid_frequency_deferred_to_build() {
        let err = ControllerBuilder::new()
            .frequency_hz(0.0)
            .ids(vec![1])
            .build_with_transport(MockTransport::new(&[1]))
            .unwrap_err();
        assert!(matches!(err, DriverError::Config(ConfigError::InvalidFrequency(_))));
    }

    #[test]
    fn test_startup_failure_returns_error() {
        let mock = MockTransport::new(&[1]);
        mock.handle().set_failing(Some(MockFault::Timeout));

        let err = ControllerBuilder::new()
            .ids(vec![1])
            .build_with_transport(mock)
            .unwrap_err();
        assert!(matches!(err, DriverError::Bus(ref e) if e.is_timeout()));
    }

    #[test]
    fn test_missing_actuator_fails_startup() {
        let err = ControllerBuilder::new()
            .ids(vec![1, 9])
            .build_with_transport(MockTransport::new(&[1]))
            .unwrap_err();
        assert!(matches!(err, DriverError::Bus(BusError::Timeout { id: 9 })));
    }

    #[test]
    fn test_initial_torque_disabled() {
        let mock = MockTransport::new(&[1]);
        let handle = mock.handle();
        let controller = ControllerBuilder::new()
            .ids(vec![1])
            .loop_config(LoopConfig {
                initial_torque: false,
                ..LoopConfig::default()
            })
            .build_with_transport(mock)
            .unwrap();

        assert_eq!(controller.torque_enabled(), vec![false]);
        assert_eq!(
            handle.writes_to(&sts3215::TORQUE_ENABLE),
            vec![MockWrite::Sync {
                address: sts3215::TORQUE_ENABLE.address,
                entries: vec![(1, 0)]
            }]
        );
    }
}
