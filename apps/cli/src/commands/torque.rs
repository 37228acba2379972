//! 扭矩开关（直接访问总线）

use crate::config::CliConfig;
use crate::connection::ConnectionArgs;
use anyhow::Result;
use clap::{Args, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorqueState {
    On,
    Off,
}

/// 扭矩命令参数
#[derive(Args, Debug)]
pub struct TorqueCommand {
    /// on | off
    #[arg(value_enum)]
    pub state: TorqueState,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

impl TorqueCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let connection = self.connection.resolve(config)?;
        let mut bus = connection.bus()?;
        let enable = self.state == TorqueState::On;

        bus.sync_write_torque_enable(&connection.ids, enable)?;
        println!(
            "✅ Torque {} for {:?}",
            if enable { "enabled" } else { "disabled" },
            connection.ids
        );
        Ok(())
    }
}
