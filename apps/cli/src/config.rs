//! CLI 配置文件
//!
//! `~/.config/feetech/config.toml`，命令行参数优先于配置文件。

use anyhow::{Context, Result};
use feetech_sdk::PositionUnit;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件路径
pub fn config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("Cannot determine config directory")?;
    path.push("feetech");
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// 默认串口
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    /// 默认舵机 ID
    pub ids: Option<Vec<u8>>,
    /// 默认控制频率（Hz）
    pub frequency_hz: Option<f64>,
    pub unit: Option<PositionUnit>,
}

impl CliConfig {
    /// 加载默认位置的配置（不存在时返回默认值）
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = config_file()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, format!("# Feetech CLI Configuration\n\n{}", content))
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}
