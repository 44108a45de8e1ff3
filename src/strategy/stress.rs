//! 压力值：平台固定区间 [MIN_STRESS, MAX_STRESS] 与钳制

use serde::{Deserialize, Serialize};

pub const MIN_STRESS: f64 = -1.0;
pub const MAX_STRESS: f64 = 1.0;

/// 将压力值钳制到平台区间；None 表示未设置（不同于 0），原样返回
pub fn clamp_stress(stress: Option<f64>) -> Option<f64> {
    stress.map(|s| {
        if s.is_nan() {
            tracing::warn!("NaN stress value, snapping to {}", MIN_STRESS);
            MIN_STRESS
        } else if s < MIN_STRESS {
            MIN_STRESS
        } else if s > MAX_STRESS {
            MAX_STRESS
        } else {
            s
        }
    })
}

/// 情景适配的压力类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressCategory {
    Environmental,
    Physiological,
    Cognitive,
}
