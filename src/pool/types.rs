//! 连接池类型定义模块

use super::engine::EngineStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 扩缩容动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    None,
}

impl ScalingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingAction::ScaleUp => "scale_up",
            ScalingAction::ScaleDown => "scale_down",
            ScalingAction::None => "none",
        }
    }
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次扩缩容判断的结果，只记录日志，不持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    /// 可读的原因说明（包含利用率数值）
    pub reason: String,
    /// 窗口平均利用率
    pub utilization: f64,
    /// 窗口平均CPU
    pub cpu: f64,
    /// 判断时的引擎数
    pub engine_count: usize,
    /// 动作是否已执行成功
    pub applied: bool,
}

impl ScalingDecision {
    pub(crate) fn none<S: Into<String>>(reason: S, utilization: f64, cpu: f64, engine_count: usize) -> Self {
        Self {
            action: ScalingAction::None,
            reason: reason.into(),
            utilization,
            cpu,
            engine_count,
            applied: false,
        }
    }
}

/// 连接池整体健康状况
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolHealth {
    pub engine_count: usize,
    pub max_engines: usize,
    /// 所有引擎聚合后的利用率百分比
    pub utilization: f64,
    pub checked_out: u32,
    pub predicted_load: f64,
    pub recovered_leaks: u64,
    pub tracked_checkouts: usize,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub scaling_failures: u64,
    pub engines: Vec<EngineStatus>,
}
