//! PING 与总线扫描

use crate::config::CliConfig;
use crate::connection::ConnectionArgs;
use anyhow::Result;
use clap::Args;
use feetech_sdk::protocol::MAX_ID;

/// PING 命令参数：逐个 PING 并打印型号、电压、温度
#[derive(Args, Debug)]
pub struct PingCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

impl PingCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let connection = self.connection.resolve(config)?;
        let mut bus = connection.bus()?;

        let mut missing = Vec::new();
        for &id in &connection.ids {
            match bus.ping(id) {
                Ok(()) => println!(
                    "  id {:>3}: model {}, {:.1} V, {} °C",
                    id,
                    bus.read_model(id)?,
                    bus.read_present_voltage(id)?,
                    bus.read_present_temperature(id)?
                ),
                Err(e) => {
                    println!("  id {:>3}: no answer ({})", id, e);
                    missing.push(id);
                },
            }
        }

        anyhow::ensure!(missing.is_empty(), "Actuators {:?} did not answer", missing);
        Ok(())
    }
}

/// 扫描命令参数
#[derive(Args, Debug)]
pub struct ScanCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// 扫描的最大 ID
    #[arg(long, default_value_t = MAX_ID)]
    pub max_id: u8,
}

impl ScanCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        // 扫描不需要配置的 ID 列表；模拟总线下使用给定 ID 作为在线舵机
        let mut args = self.connection.clone();
        args.ids.get_or_insert_with(|| vec![1]);
        let connection = args.resolve(config)?;
        let mut bus = connection.bus()?;

        println!("🔍 Scanning ids 1..={} on {} ...", self.max_id, connection.port);
        let found = bus.scan(1..=self.max_id.min(MAX_ID));
        println!("Found {} actuator(s): {:?}", found.len(), found);
        Ok(())
    }
}
