//! 连接参数与控制器构造
//!
//! 每个命令独立执行：读取配置 → 打开总线 → 执行操作 → 关闭。

use crate::config::CliConfig;
use anyhow::{Context, Result, bail};
use clap::Args;
use feetech_sdk::bus::MockTransport;
use feetech_sdk::driver::{DEFAULT_BAUD_RATE, DEFAULT_PORT};
use feetech_sdk::prelude::*;
use feetech_sdk::SerialTransport;
use std::time::Duration;
use tracing::info;

/// 单次事务超时
const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(20);

/// 连接参数（覆盖配置文件）
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// 串口设备
    #[arg(short, long)]
    pub port: Option<String>,

    /// 波特率
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// 舵机 ID，逗号分隔（如 1,2,3）
    #[arg(long, value_delimiter = ',')]
    pub ids: Option<Vec<u8>>,

    /// 位置单位：raw | rad | deg
    #[arg(short, long)]
    pub unit: Option<PositionUnit>,

    /// 使用内存模拟总线（无需硬件）
    #[arg(long)]
    pub mock: bool,
}

/// 合并命令行与配置文件后的连接设置
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub port: String,
    pub baud_rate: u32,
    pub ids: Vec<u8>,
    pub unit: PositionUnit,
    pub mock: bool,
}

impl ConnectionArgs {
    pub fn resolve(&self, config: &CliConfig) -> Result<Connection> {
        let ids = self
            .ids
            .clone()
            .or_else(|| config.ids.clone())
            .context("No actuator ids given (use --ids or `feetech-cli config set --ids`)")?;
        if ids.is_empty() {
            bail!("Actuator id list is empty");
        }

        Ok(Connection {
            port: self
                .port
                .clone()
                .or_else(|| config.port.clone())
                .unwrap_or_else(|| DEFAULT_PORT.to_string()),
            baud_rate: self.baud.or(config.baud_rate).unwrap_or(DEFAULT_BAUD_RATE),
            ids,
            unit: self.unit.or(config.unit).unwrap_or_default(),
            mock: self.mock,
        })
    }
}

impl Connection {
    /// 模拟总线：目标位置立即反映到当前位置
    fn mock_transport(&self) -> MockTransport {
        let mock = MockTransport::new(&self.ids);
        mock.handle().set_mirror_goal(true);
        mock
    }

    /// 启动后台控制器
    pub fn controller(&self, frequency_hz: f64) -> Result<Controller> {
        let builder = ControllerBuilder::new()
            .port(self.port.clone())
            .baud_rate(self.baud_rate)
            .ids(self.ids.clone())
            .position_unit(self.unit)
            .frequency_hz(frequency_hz)
            .transaction_timeout(TRANSACTION_TIMEOUT);

        let controller = if self.mock {
            info!("Using mock bus for ids {:?}", self.ids);
            builder.build_with_transport(self.mock_transport())
        } else {
            builder.build()
        }
        .with_context(|| format!("Failed to start controller on {}", self.port))?;
        Ok(controller)
    }

    /// 直接寄存器访问（不启动控制循环）
    pub fn bus(&self) -> Result<Sts3215Bus<Box<dyn Transport>>> {
        let transport: Box<dyn Transport> = if self.mock {
            Box::new(self.mock_transport())
        } else {
            Box::new(
                SerialTransport::open(&self.port, self.baud_rate, TRANSACTION_TIMEOUT)
                    .with_context(|| format!("Failed to open {}", self.port))?,
            )
        };
        Ok(Sts3215Bus::new(transport).with_unit(self.unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let config = CliConfig {
            port: Some("/dev/ttyUSB1".to_string()),
            baud_rate: Some(115_200),
            ids: Some(vec![1, 2]),
            frequency_hz: None,
            unit: Some(PositionUnit::Degrees),
        };
        let args = ConnectionArgs {
            ids: Some(vec![7]),
            unit: Some(PositionUnit::Raw),
            ..ConnectionArgs::default()
        };

        let connection = args.resolve(&config).unwrap();
        assert_eq!(connection.port, "/dev/ttyUSB1");
        assert_eq!(connection.baud_rate, 115_200);
        assert_eq!(connection.ids, vec![7]);
        assert_eq!(connection.unit, PositionUnit::Raw);
    }

    #[test]
    fn test_defaults_and_missing_ids() {
        let args = ConnectionArgs::default();
        assert!(args.resolve(&CliConfig::default()).is_err());

        let args = ConnectionArgs {
            ids: Some(vec![1]),
            ..ConnectionArgs::default()
        };
        let connection = args.resolve(&CliConfig::default()).unwrap();
        assert_eq!(connection.port, DEFAULT_PORT);
        assert_eq!(connection.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(connection.unit, PositionUnit::Radians);
    }

    #[test]
    fn test_mock_controller_starts() {
        let args = ConnectionArgs {
            ids: Some(vec![1, 2]),
            mock: true,
            ..ConnectionArgs::default()
        };
        let controller = args.resolve(&CliConfig::default()).unwrap().controller(100.0).unwrap();
        assert_eq!(controller.ids(), &[1, 2]);
        controller.shutdown().unwrap();
    }
}
