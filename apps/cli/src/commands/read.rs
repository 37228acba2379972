//! 读取位置与速度（直接访问总线，不启动控制循环，不改变扭矩）

use crate::config::CliConfig;
use crate::connection::ConnectionArgs;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::thread;
use std::time::Duration;

/// 读取命令参数
#[derive(Args, Debug)]
pub struct ReadCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// 读取次数
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: u32,

    /// 两次读取的间隔（毫秒）
    #[arg(short, long, default_value_t = 100)]
    pub interval_ms: u64,

    /// 输出格式：table | json
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// 单次读取结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub ids: Vec<u8>,
    pub positions: Vec<f64>,
    pub speeds: Vec<f64>,
}

impl Reading {
    fn render(&self, format: &str) -> Result<String> {
        if format == "json" {
            return serde_json::to_string(self).context("Failed to serialize reading");
        }
        Ok(self
            .ids
            .iter()
            .zip(self.positions.iter().zip(&self.speeds))
            .map(|(id, (pos, speed))| format!("  id {:>3}: position {:>10.4}  speed {:>10.4}", id, pos, speed))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl ReadCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let connection = self.connection.resolve(config)?;
        let mut bus = connection.bus()?;

        for i in 0..self.count {
            let reading = Reading {
                ids: connection.ids.clone(),
                positions: bus.sync_read_present_position(&connection.ids)?,
                speeds: bus.sync_read_present_speed(&connection.ids)?,
            };
            println!("{}", reading.render(&self.format)?);

            if i + 1 < self.count {
                thread::sleep(Duration::from_millis(self.interval_ms));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_json() {
        let reading = Reading {
            ids: vec![1],
            positions: vec![0.5],
            speeds: vec![-1.0],
        };
        assert_eq!(
            reading.render("json").unwrap(),
            r#"{"ids":[1],"positions":[0.5],"speeds":[-1.0]}"#
        );
        assert!(reading.render("table").unwrap().contains("id   1"));
    }

    #[test]
    fn test_mock_read() {
        let cmd = ReadCommand {
            connection: ConnectionArgs {
                ids: Some(vec![1, 2]),
                mock: true,
                ..ConnectionArgs::default()
            },
            count: 2,
            interval_ms: 1,
            format: "json".to_string(),
        };
        cmd.execute(&CliConfig::default()).unwrap();
    }
}
