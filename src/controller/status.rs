//! 综合状态文档

use super::health::HealthReport;
use crate::breaker::CircuitSnapshot;
use crate::cache::CacheStats;
use crate::error::ShieldResult;
use crate::facade::OperationStatsSnapshot;
use crate::pool::{PoolHealth, ScalingDecision};
use crate::scheduler::SchedulerStats;
use crate::types::OperationMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 状态文档格式版本
pub const STATUS_SCHEMA_VERSION: u32 = 1;

/// 控制器综合状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveStatus {
    pub schema_version: u32,
    pub instance_id: String,
    pub mode: OperationMode,
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub generated_at: DateTime<Utc>,
    pub mode_changes: u64,
    pub optimizations: u64,
    pub operations: OperationStatsSnapshot,
    pub pool: PoolHealth,
    pub circuits: Vec<CircuitSnapshot>,
    pub open_circuits: usize,
    pub cache: CacheStats,
    pub scheduler: SchedulerStats,
    pub health: Option<HealthReport>,
    pub last_scaling: Option<ScalingDecision>,
}

impl ComprehensiveStatus {
    pub fn to_json(&self) -> ShieldResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate
    }
}
