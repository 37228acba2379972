//! 控制器集成测试（模拟总线）
//!
//! 验证：
//! 1. 目标邮箱 Last Write Wins，同步写内容与配置顺序一致
//! 2. 遥测读取不阻塞在总线延迟上，首次成功前返回未知
//! 3. 冻结提交缓存中的原始位置，不改变扭矩
//! 4. 连续失败低于阈值为降级，达到阈值后停止且不再写总线

use feetech_sdk::bus::{MockFault, MockHandle, MockTransport, MockWrite};
use feetech_sdk::prelude::*;
use feetech_sdk::{ControllerStatus, sts3215};
use std::thread;
use std::time::{Duration, Instant};

fn fast_loop() -> LoopConfig {
    LoopConfig {
        period: Duration::from_millis(1),
        ..LoopConfig::default()
    }
}

fn raw_controller(ids: &[ActuatorId], config: LoopConfig) -> (Controller, MockHandle) {
    let mock = MockTransport::new(ids);
    let handle = mock.handle();
    let controller = ControllerBuilder::new()
        .ids(ids.to_vec())
        .position_unit(PositionUnit::Raw)
        .loop_config(config)
        .build_with_transport(mock)
        .unwrap();
    (controller, handle)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// 只能写、读取总是超时的总线
struct NoTelemetry(MockTransport);

impl Transport for NoTelemetry {
    fn ping(&mut self, id: ActuatorId) -> Result<(), BusError> {
        self.0.ping(id)
    }

    fn read_block(&mut self, id: ActuatorId, _address: u8, _len: u8) -> Result<Vec<u8>, BusError> {
        Err(BusError::Timeout { id })
    }

    fn write_block(&mut self, id: ActuatorId, address: u8, data: &[u8]) -> Result<(), BusError> {
        self.0.write_block(id, address, data)
    }

    fn sync_write(
        &mut self,
        register: &feetech_sdk::protocol::Register,
        values: &[(ActuatorId, i32)],
    ) -> Result<(), BusError> {
        self.0.sync_write(register, values)
    }
}

#[test]
fn test_sync_write_scenario_and_canned_telemetry() {
    let (controller, handle) = raw_controller(&[1, 2], fast_loop());
    handle.set_register(1, &sts3215::PRESENT_POSITION, 1234).unwrap();
    handle.set_register(2, &sts3215::PRESENT_POSITION, -56).unwrap();
    handle.set_register(1, &sts3215::PRESENT_SPEED, 7).unwrap();
    handle.set_register(2, &sts3215::PRESENT_SPEED, -8).unwrap();

    controller.set_new_target(&[10.0, 20.0]).unwrap();

    assert!(wait_until(Duration::from_secs(1), || {
        !handle.writes_to(&sts3215::GOAL_POSITION).is_empty()
    }));
    assert_eq!(
        handle.writes_to(&sts3215::GOAL_POSITION),
        vec![MockWrite::Sync {
            address: 42,
            entries: vec![(1, 10), (2, 20)]
        }]
    );

    assert!(wait_until(Duration::from_secs(1), || {
        controller.get_present_position() == vec![Some(1234.0), Some(-56.0)]
    }));
    assert_eq!(controller.get_current_speed(), vec![Some(7.0), Some(-8.0)]);
}

#[test]
fn test_latest_target_wins() {
    let config = LoopConfig {
        period: Duration::from_millis(200),
        ..LoopConfig::default()
    };
    let (controller, handle) = raw_controller(&[1], config);

    // 等第一个周期结束，之后有约 200ms 的空闲窗口
    assert!(wait_until(Duration::from_secs(1), || controller.metrics().iterations >= 1));
    controller.set_new_target(&[100.0]).unwrap();
    controller.set_new_target(&[200.0]).unwrap();

    assert!(wait_until(Duration::from_secs(2), || controller.metrics().target_writes >= 1));
    assert_eq!(
        handle.writes_to(&sts3215::GOAL_POSITION),
        vec![MockWrite::Sync {
            address: sts3215::GOAL_POSITION.address,
            entries: vec![(1, 200)]
        }]
    );
    let metrics = controller.metrics();
    assert_eq!(metrics.commands_submitted, 2);
    assert_eq!(metrics.command_overwrites, 1);
}

#[test]
fn test_unknown_before_first_read() {
    let transport = NoTelemetry(MockTransport::new(&[1, 2]));
    let controller = ControllerBuilder::new()
        .ids(vec![1, 2])
        .loop_config(LoopConfig {
            max_consecutive_failures: u32::MAX,
            ..fast_loop()
        })
        .build_with_transport(transport)
        .unwrap();

    thread::sleep(Duration::from_millis(20));
    assert_eq!(controller.get_present_position(), vec![None, None]);
    assert_eq!(controller.get_current_speed(), vec![None, None]);
    assert!(controller.telemetry().iter().all(|s| !s.is_known()));

    assert!(matches!(
        controller.freeze(),
        Err(DriverError::TelemetryUnavailable { id: 1 })
    ));
    assert!(controller.status().degraded);
}

#[test]
fn test_freeze_holds_cached_positions() {
    let (controller, handle) = raw_controller(&[4, 5, 6], fast_loop());
    for (id, raw) in [(4, 100), (5, 2048), (6, 4000)] {
        handle.set_register(id, &sts3215::PRESENT_POSITION, raw).unwrap();
    }
    assert!(wait_until(Duration::from_secs(1), || {
        controller.get_present_position()
            == vec![Some(100.0), Some(2048.0), Some(4000.0)]
    }));

    handle.clear_writes();
    controller.freeze().unwrap();

    assert!(wait_until(Duration::from_secs(1), || {
        !handle.writes_to(&sts3215::GOAL_POSITION).is_empty()
    }));
    assert_eq!(
        handle.writes_to(&sts3215::GOAL_POSITION)[0],
        MockWrite::Sync {
            address: sts3215::GOAL_POSITION.address,
            entries: vec![(4, 100), (5, 2048), (6, 4000)]
        }
    );
    assert!(handle.writes_to(&sts3215::TORQUE_ENABLE).is_empty());
    assert_eq!(controller.torque_enabled(), vec![true, true, true]);
}

#[test]
fn test_freeze_in_radians_is_exact() {
    let mock = MockTransport::new(&[1]);
    let handle = mock.handle();
    handle.set_register(1, &sts3215::PRESENT_POSITION, 3001).unwrap();
    let controller = ControllerBuilder::new()
        .ids(vec![1])
        .position_unit(PositionUnit::Radians)
        .loop_config(fast_loop())
        .build_with_transport(mock)
        .unwrap();

    assert!(wait_until(Duration::from_secs(1), || {
        controller.get_present_position_raw() == vec![Some(3001)]
    }));
    controller.freeze().unwrap();

    assert!(wait_until(Duration::from_secs(1), || {
        handle.register(1, &sts3215::GOAL_POSITION) == Some(3001)
    }));
}

#[test]
fn test_degraded_below_threshold() {
    let config = LoopConfig {
        max_consecutive_failures: 1_000,
        ..fast_loop()
    };
    let (controller, handle) = raw_controller(&[1, 2], config);

    handle.set_failing(Some(MockFault::Timeout));
    assert!(wait_until(Duration::from_secs(1), || {
        controller.status().consecutive_failures >= 3
    }));
    let status = controller.status();
    assert_eq!(status.state, LoopState::Running);
    assert!(status.degraded);
    assert!(status.link_failure.is_none());
    assert!(controller.set_new_target(&[1.0, 2.0]).is_ok());

    handle.set_failing(None);
    assert!(wait_until(Duration::from_secs(1), || !controller.status().degraded));
    assert_eq!(controller.status().consecutive_failures, 0);
    assert!(controller.metrics().timeouts >= 3);
}

#[test]
fn test_link_failure_at_threshold_stops_writes() {
    let config = LoopConfig {
        max_consecutive_failures: 5,
        ..fast_loop()
    };
    let (controller, handle) = raw_controller(&[1, 2], config);

    handle.set_failing(Some(MockFault::Corrupt));
    assert!(wait_until(Duration::from_secs(2), || {
        controller.status().state == LoopState::Stopped
    }));

    let ControllerStatus {
        link_failure,
        consecutive_failures,
        ..
    } = controller.status();
    assert_eq!(consecutive_failures, 5);
    assert_eq!(link_failure.map(|f| f.consecutive_failures), Some(5));

    handle.set_failing(None);
    handle.clear_writes();
    let transactions = handle.transactions();

    assert!(matches!(
        controller.set_new_target(&[1.0, 2.0]),
        Err(DriverError::LinkFailure {
            consecutive_failures: 5,
            ..
        })
    ));
    assert!(matches!(
        controller.enable_torque(),
        Err(DriverError::LinkFailure { .. })
    ));
    assert!(matches!(controller.freeze(), Err(DriverError::LinkFailure { .. })));

    thread::sleep(Duration::from_millis(20));
    assert!(handle.writes().is_empty());
    assert_eq!(handle.transactions(), transactions);
    // 链路失败不改变扭矩
    assert_eq!(controller.torque_enabled(), vec![true, true]);
}

#[test]
fn test_invalid_targets_never_reach_bus() {
    let mock = MockTransport::new(&[1]);
    let handle = mock.handle();
    let controller = ControllerBuilder::new()
        .ids(vec![1])
        .loop_config(fast_loop())
        .build_with_transport(mock)
        .unwrap();

    for value in [f64::NAN, f64::INFINITY] {
        let err = controller.set_new_target(&[value]).unwrap_err();
        assert!(matches!(err, DriverError::Config(ConfigError::InvalidTarget { id: 1, .. })));
    }
    let err = controller.set_new_target_raw(&[40000]).unwrap_err();
    assert!(matches!(err, DriverError::Config(ConfigError::InvalidTarget { id: 1, .. })));

    // 超过原先的失败阈值所需时间，循环仍正常运行
    thread::sleep(Duration::from_millis(50));
    let status = controller.status();
    assert_eq!(status.state, LoopState::Running);
    assert!(status.link_failure.is_none());
    assert!(handle.writes_to(&sts3215::GOAL_POSITION).is_empty());

    controller.set_new_target(&[0.0]).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        handle.writes_to(&sts3215::GOAL_POSITION)
            == vec![MockWrite::Sync {
                address: sts3215::GOAL_POSITION.address,
                entries: vec![(1, 2048)],
            }]
    }));
}

#[test]
fn test_disable_torque_then_target_keeps_torque_off() {
    let (controller, handle) = raw_controller(&[1, 2], fast_loop());
    controller.disable_torque().unwrap();
    assert_eq!(handle.register(1, &sts3215::TORQUE_ENABLE), Some(0));

    handle.clear_writes();
    controller.set_new_target(&[500.0, 600.0]).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        handle.register(2, &sts3215::GOAL_POSITION) == Some(600)
    }));
    thread::sleep(Duration::from_millis(10));

    assert!(handle.writes_to(&sts3215::TORQUE_ENABLE).is_empty());
    assert_eq!(handle.register(1, &sts3215::TORQUE_ENABLE), Some(0));
    assert_eq!(handle.register(2, &sts3215::TORQUE_ENABLE), Some(0));
    assert_eq!(controller.torque_enabled(), vec![false, false]);
}

#[test]
fn test_read_latency_independent_of_bus() {
    let mock = MockTransport::new(&[1, 2, 3]);
    let handle = mock.handle();
    let controller = ControllerBuilder::new()
        .ids(vec![1, 2, 3])
        .loop_config(fast_loop())
        .build_with_transport(mock)
        .unwrap();
    handle.set_latency(Duration::from_millis(50));

    let mut worst = Duration::ZERO;
    for _ in 0..1_000 {
        let start = Instant::now();
        let positions = controller.get_present_position();
        worst = worst.max(start.elapsed());
        assert_eq!(positions.len(), 3);
    }
    assert!(worst < Duration::from_millis(10), "worst read took {:?}", worst);
}

#[test]
fn test_concurrent_callers() {
    let (controller, _handle) = raw_controller(&[1, 2], fast_loop());
    let controller = std::sync::Arc::new(controller);

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let controller = controller.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    controller.set_new_target(&[t as f64, i as f64]).unwrap();
                    let _ = controller.get_present_position();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(controller.metrics().commands_submitted, 800);
}

#[test]
fn test_shutdown_and_drop_release_bus() {
    let (controller, handle) = raw_controller(&[1], fast_loop());
    controller.shutdown().unwrap();
    assert_eq!(controller.status().state, LoopState::Stopped);
    assert!(matches!(controller.set_new_target(&[0.0]), Err(DriverError::Stopped)));

    let (controller, handle2) = raw_controller(&[1], fast_loop());
    assert!(wait_until(Duration::from_secs(1), || handle2.transactions() > 5));
    drop(controller);
    let transactions = handle2.transactions();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(handle2.transactions(), transactions);

    // 关闭后舵机保持原扭矩
    assert_eq!(handle.register(1, &sts3215::TORQUE_ENABLE), Some(1));
}

#[test]
fn test_configuration_errors() {
    let build = |ids: Vec<ActuatorId>, layouts: Vec<RegisterLayout>| {
        ControllerBuilder::new()
            .ids(ids)
            .layouts(layouts)
            .build_with_transport(MockTransport::new(&[1, 2, 3]))
    };
    let layout = RegisterLayout::sts3215();

    assert!(matches!(
        build(vec![], vec![layout]),
        Err(DriverError::Config(ConfigError::Empty))
    ));
    assert!(matches!(
        build(vec![1, 2], vec![layout; 3]),
        Err(DriverError::Config(ConfigError::Mismatch { ids: 2, layouts: 3 }))
    ));
    assert!(matches!(
        build(vec![1, 1], vec![layout]),
        Err(DriverError::Config(ConfigError::DuplicateId(1)))
    ));
    assert!(matches!(
        build(vec![0], vec![layout]),
        Err(DriverError::Config(ConfigError::InvalidId(0)))
    ));
    assert!(matches!(
        build(vec![253], vec![layout]),
        Err(DriverError::Config(ConfigError::InvalidId(253)))
    ));

    let (controller, _) = raw_controller(&[1, 2], fast_loop());
    assert!(matches!(
        controller.set_new_target(&[1.0, 2.0, 3.0]),
        Err(DriverError::Config(ConfigError::LengthMismatch {
            expected: 2,
            actual: 3
        }))
    ));
}
