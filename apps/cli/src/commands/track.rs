//! 正弦轨迹跟踪
//!
//! 所有舵机以同一正弦曲线（围绕零位）运动，Ctrl-C 时冻结在当前位置。

use crate::config::CliConfig;
use crate::connection::ConnectionArgs;
use anyhow::{Context, Result};
use clap::Args;
use feetech_sdk::protocol::conv::position_rad_to_raw;
use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// 默认控制频率（Hz）
const DEFAULT_LOOP_HZ: f64 = 500.0;

/// 跟踪命令参数
#[derive(Args, Debug)]
pub struct TrackCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// 振幅（度）
    #[arg(short = 'a', long, default_value_t = 90.0)]
    pub amplitude_deg: f64,

    /// 正弦频率（Hz）
    #[arg(short = 'f', long, default_value_t = 1.0)]
    pub sine_hz: f64,

    /// 目标提交频率（Hz）
    #[arg(short = 'r', long, default_value_t = 50.0)]
    pub rate: f64,

    /// 控制循环频率（Hz，覆盖配置文件）
    #[arg(long)]
    pub loop_hz: Option<f64>,

    /// 运行时长（秒），不指定则运行到 Ctrl-C
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// 每次提交后打印位置与速度
    #[arg(short, long)]
    pub verbose: bool,
}

impl TrackCommand {
    /// t 时刻的原始目标值
    fn target_raw(&self, t: f64) -> Result<i32> {
        let deg = self.amplitude_deg * (2.0 * PI * self.sine_hz * t).sin();
        position_rad_to_raw(deg.to_radians())
            .with_context(|| format!("Target {deg}° is not a valid position"))
    }

    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        anyhow::ensure!(self.rate > 0.0, "--rate must be positive");
        let connection = self.connection.resolve(config)?;
        let loop_hz = self.loop_hz.or(config.frequency_hz).unwrap_or(DEFAULT_LOOP_HZ);

        let running = Arc::new(AtomicBool::new(true));
        {
            let running = running.clone();
            ctrlc::set_handler(move || {
                running.store(false, Ordering::SeqCst);
            })
            .context("Failed to install Ctrl-C handler")?;
        }

        println!("🔌 Connecting to {:?} ...", connection.ids);
        let controller = connection.controller(loop_hz)?;
        let count = controller.ids().len();

        // 先回到零位
        controller.set_new_target_raw(&vec![self.target_raw(0.0)?; count])?;
        thread::sleep(Duration::from_secs(2));

        println!(
            "🎯 Tracking {:.1}° @ {:.2} Hz (submit {:.0} Hz, loop {:.0} Hz), Ctrl-C to freeze",
            self.amplitude_deg, self.sine_hz, self.rate, loop_hz
        );
        let period = Duration::from_secs_f64(1.0 / self.rate);
        let start = Instant::now();
        let mut last_report = Instant::now();

        while running.load(Ordering::SeqCst) {
            let t = start.elapsed().as_secs_f64();
            if self.duration.is_some_and(|d| t >= d) {
                break;
            }

            if let Err(e) = controller.set_new_target_raw(&vec![self.target_raw(t)?; count]) {
                warn!("Stopping: {}", e);
                break;
            }

            if self.verbose {
                println!("{:?}", controller.get_present_position());
                println!("{:?}", controller.get_current_speed());
            } else if last_report.elapsed() >= Duration::from_secs(1) {
                let metrics = controller.metrics();
                println!(
                    "  positions {:?}  overruns {:.1}%  failures {:.1}%",
                    controller.get_present_position(),
                    metrics.overrun_rate(),
                    metrics.failure_rate()
                );
                last_report = Instant::now();
            }

            thread::sleep(period);
        }

        match controller.freeze() {
            Ok(()) => println!("🧊 Frozen at current position"),
            Err(e) => warn!("Freeze failed: {}", e),
        }
        thread::sleep(Duration::from_secs(1));

        let status = controller.status();
        controller.shutdown()?;
        if let Some(failure) = status.link_failure {
            anyhow::bail!(
                "Link failure after {} consecutive failed iterations: {}",
                failure.consecutive_failures,
                failure.last_error
            );
        }
        println!("✅ Done");
        Ok(())
    }
}
