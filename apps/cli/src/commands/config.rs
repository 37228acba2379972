//! 配置管理命令

use crate::config::{CliConfig, config_file};
use anyhow::Result;
use clap::Subcommand;
use feetech_sdk::PositionUnit;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 默认串口
        #[arg(short, long)]
        port: Option<String>,

        /// 默认波特率
        #[arg(short, long)]
        baud: Option<u32>,

        /// 默认舵机 ID，逗号分隔
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<u8>>,

        /// 默认控制频率（Hz）
        #[arg(short, long)]
        frequency: Option<f64>,

        /// 默认位置单位：raw | rad | deg
        #[arg(short, long)]
        unit: Option<PositionUnit>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称（port / baud / ids / frequency / unit / all）
        #[arg(default_value = "all")]
        key: String,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Set {
                port,
                baud,
                ids,
                frequency,
                unit,
            } => {
                let mut config = CliConfig::load()?;
                apply(&mut config, port, baud, ids, frequency, unit);
                let path = config.save()?;
                println!("✅ Saved {}", path.display());
                Ok(())
            },
            ConfigCommand::Get { key } => {
                let config = CliConfig::load()?;
                print_key(&config, &key);
                Ok(())
            },
        }
    }
}

fn apply(
    config: &mut CliConfig,
    port: Option<String>,
    baud: Option<u32>,
    ids: Option<Vec<u8>>,
    frequency: Option<f64>,
    unit: Option<PositionUnit>,
) {
    if port.is_some() {
        config.port = port;
    }
    if baud.is_some() {
        config.baud_rate = baud;
    }
    if ids.is_some() {
        config.ids = ids;
    }
    if frequency.is_some() {
        config.frequency_hz = frequency;
    }
    if unit.is_some() {
        config.unit = unit;
    }
}

fn print_key(config: &CliConfig, key: &str) {
    fn show<T: std::fmt::Debug>(value: &Option<T>) -> String {
        value.as_ref().map_or_else(|| "(unset)".to_string(), |v| format!("{:?}", v))
    }

    match key {
        "port" => println!("{}", show(&config.port)),
        "baud" => println!("{}", show(&config.baud_rate)),
        "ids" => println!("{}", show(&config.ids)),
        "frequency" => println!("{}", show(&config.frequency_hz)),
        "unit" => println!("{}", show(&config.unit)),
        _ => {
            if let Ok(path) = config_file() {
                println!("Config file: {}", path.display());
            }
            println!("  port:      {}", show(&config.port));
            println!("  baud:      {}", show(&config.baud_rate));
            println!("  ids:       {}", show(&config.ids));
            println!("  frequency: {}", show(&config.frequency_hz));
            println!("  unit:      {}", show(&config.unit));
        },
    }
}
