//! 原始寄存器值与物理单位之间的转换
//!
//! STS3215：一圈 4096 步，2048 为零位。速度单位为 步/秒。

use std::f64::consts::PI;

/// 每圈编码器步数
pub const STEPS_PER_TURN: f64 = 4096.0;

/// 零位对应的原始值
pub const CENTER_STEP: i32 = 2048;

const RAD_PER_STEP: f64 = 2.0 * PI / STEPS_PER_TURN;

/// 原始位置 → 弧度
pub fn position_raw_to_rad(raw: i32) -> f64 {
    (raw - CENTER_STEP) as f64 * RAD_PER_STEP
}

/// 四舍五入到整数；非有限值或超出 `i32` 范围时返回 `None`
fn round_to_i32(value: f64) -> Option<i32> {
    let rounded = value.round();
    if rounded.is_finite() && rounded >= i32::MIN as f64 && rounded <= i32::MAX as f64 {
        Some(rounded as i32)
    } else {
        None
    }
}

/// 弧度 → 原始位置（四舍五入）
///
/// NaN、无穷或超出 `i32` 范围的输入返回 `None`。
pub fn position_rad_to_raw(rad: f64) -> Option<i32> {
    round_to_i32(rad / RAD_PER_STEP)?.checked_add(CENTER_STEP)
}

/// 原始速度（步/秒）→ 弧度/秒
pub fn speed_raw_to_rad_s(raw: i32) -> f64 {
    raw as f64 * RAD_PER_STEP
}

/// 弧度/秒 → 原始速度（步/秒）
pub fn speed_rad_s_to_raw(rad_s: f64) -> Option<i32> {
    round_to_i32(rad_s / RAD_PER_STEP)
}

/// 位置/速度的对外单位
///
/// 位置与速度使用同一单位族：`Radians` 对应 rad 与 rad/s，
/// `Degrees` 对应 ° 与 °/s，`Raw` 直接透传寄存器值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PositionUnit {
    Raw,
    #[default]
    Radians,
    Degrees,
}

impl PositionUnit {
    /// 对外位置值 → 原始寄存器值（无法表示时为 `None`）
    pub fn position_to_raw(self, value: f64) -> Option<i32> {
        match self {
            PositionUnit::Raw => round_to_i32(value),
            PositionUnit::Radians => position_rad_to_raw(value),
            PositionUnit::Degrees => position_rad_to_raw(value.to_radians()),
        }
    }

    /// 原始寄存器值 → 对外位置值
    pub fn position_from_raw(self, raw: i32) -> f64 {
        match self {
            PositionUnit::Raw => raw as f64,
            PositionUnit::Radians => position_raw_to_rad(raw),
            PositionUnit::Degrees => position_raw_to_rad(raw).to_degrees(),
        }
    }

    /// 原始速度值 → 对外速度值
    pub fn speed_from_raw(self, raw: i32) -> f64 {
        match self {
            PositionUnit::Raw => raw as f64,
            PositionUnit::Radians => speed_raw_to_rad_s(raw),
            PositionUnit::Degrees => speed_raw_to_rad_s(raw).to_degrees(),
        }
    }

    /// 对外速度值 → 原始速度值
    pub fn speed_to_raw(self, value: f64) -> Option<i32> {
        match self {
            PositionUnit::Raw => round_to_i32(value),
            PositionUnit::Radians => speed_rad_s_to_raw(value),
            PositionUnit::Degrees => speed_rad_s_to_raw(value.to_radians()),
        }
    }
}

impl std::str::FromStr for PositionUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(PositionUnit::Raw),
            "rad" | "radians" => Ok(PositionUnit::Radians),
            "deg" | "degrees" => Ok(PositionUnit::Degrees),
            other => Err(format!("unknown position unit: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_center_is_zero() {
        assert!(position_raw_to_rad(2048).abs() < EPS);
        assert_eq!(position_rad_to_raw(0.0), Some(2048));
    }

    #[test]
    fn test_half_turn() {
        assert!((position_raw_to_rad(4096) - PI).abs() < EPS);
        assert!((position_raw_to_rad(0) + PI).abs() < EPS);
        assert_eq!(position_rad_to_raw(PI), Some(4096));
    }

    #[test]
    fn test_rounding_to_nearest_step() {
        // 0.4 步 → 2048，0.6 步 → 2049
        assert_eq!(position_rad_to_raw(0.4 * RAD_PER_STEP), Some(2048));
        assert_eq!(position_rad_to_raw(0.6 * RAD_PER_STEP), Some(2049));
    }

    #[test]
    fn test_speed_conversion() {
        assert!((speed_raw_to_rad_s(4096) - 2.0 * PI).abs() < EPS);
        assert!((speed_raw_to_rad_s(-1024) + PI / 2.0).abs() < EPS);
        assert_eq!(speed_rad_s_to_raw(2.0 * PI), Some(4096));
    }

    #[test]
    fn test_degrees_unit() {
        let unit = PositionUnit::Degrees;
        assert_eq!(unit.position_to_raw(90.0), Some(3072));
        assert!((unit.position_from_raw(1024) + 90.0).abs() < 1e-6);
        assert!((unit.speed_from_raw(4096) - 360.0).abs() < 1e-6);
    }

    #[test]
    fn test_raw_unit_passthrough() {
        let unit = PositionUnit::Raw;
        assert_eq!(unit.position_to_raw(1500.0), Some(1500));
        assert_eq!(unit.position_from_raw(1500), 1500.0);
        assert_eq!(unit.speed_from_raw(-20), -20.0);
    }

    #[test]
    fn test_unrepresentable_values() {
        assert_eq!(position_rad_to_raw(f64::NAN), None);
        assert_eq!(position_rad_to_raw(f64::INFINITY), None);
        assert_eq!(position_rad_to_raw(f64::NEG_INFINITY), None);
        assert_eq!(position_rad_to_raw(1e12), None);
        // i32::MAX 步加上零位偏移会溢出
        assert_eq!(PositionUnit::Radians.position_to_raw(i32::MAX as f64 * RAD_PER_STEP), None);
        assert_eq!(PositionUnit::Raw.position_to_raw(f64::NAN), None);
        assert_eq!(PositionUnit::Degrees.speed_to_raw(f64::INFINITY), None);
        assert_eq!(speed_rad_s_to_raw(-1e12), None);
    }

    #[test]
    fn test_parse_unit() {
        assert_eq!("rad".parse::<PositionUnit>(), Ok(PositionUnit::Radians));
        assert_eq!("Degrees".parse::<PositionUnit>(), Ok(PositionUnit::Degrees));
        assert_eq!("raw".parse::<PositionUnit>(), Ok(PositionUnit::Raw));
        assert!("turns".parse::<PositionUnit>().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_unit_serde_snake_case() {
        assert_eq!(serde_json::to_string(&PositionUnit::Degrees).unwrap(), "\"degrees\"");
        let unit: PositionUnit = serde_json::from_str("\"raw\"").unwrap();
        assert_eq!(unit, PositionUnit::Raw);
    }
}
