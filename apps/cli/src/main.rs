//! # Feetech CLI
//!
//! Command-line interface for Feetech serial-bus servos.
//!
//! ```bash
//! # 配置默认串口与舵机
//! feetech-cli config set --port /dev/ttyACM0 --ids 1,2,3
//!
//! # 正弦跟踪，Ctrl-C 冻结在当前位置
//! feetech-cli track --amplitude-deg 45 --sine-hz 0.5
//!
//! # 无硬件演示
//! feetech-cli track --mock --ids 1,2 --duration 5
//!
//! feetech-cli read -n 10 --format json
//! feetech-cli torque off
//! feetech-cli ping
//! feetech-cli scan --max-id 20
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod connection;

use commands::{ConfigCommand, PingCommand, ReadCommand, ScanCommand, TorqueCommand, TrackCommand};
use config::CliConfig;

/// Feetech CLI - 舵机命令行工具
#[derive(Parser, Debug)]
#[command(name = "feetech-cli")]
#[command(about = "Command-line interface for Feetech serial-bus servos", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 正弦轨迹跟踪（后台控制循环）
    Track {
        #[command(flatten)]
        args: TrackCommand,
    },

    /// 读取当前位置与速度
    Read {
        #[command(flatten)]
        args: ReadCommand,
    },

    /// 扭矩开关
    Torque {
        #[command(flatten)]
        args: TorqueCommand,
    },

    /// PING 已配置的舵机
    Ping {
        #[command(flatten)]
        args: PingCommand,
    },

    /// 扫描总线上的舵机
    Scan {
        #[command(flatten)]
        args: ScanCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("feetech_cli=info".parse()?)
                .add_directive("feetech_driver=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // 命令行参数优先于配置文件
    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Track { args } => args.execute(&CliConfig::load()?),
        Commands::Read { args } => args.execute(&CliConfig::load()?),
        Commands::Torque { args } => args.execute(&CliConfig::load()?),
        Commands::Ping { args } => args.execute(&CliConfig::load()?),
        Commands::Scan { args } => args.execute(&CliConfig::load()?),
    }
}
