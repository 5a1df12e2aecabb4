//! 调优建议
//!
//! 根据聚合健康指标给出调优动作，由控制器负责执行。

use super::health::HealthInputs;
use crate::config::ThresholdConfig;
use serde::{Deserialize, Serialize};

/// 调优动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tuning {
    /// 降低调度器并发上限
    ReduceConcurrency,
    /// 缩小每个引擎的常驻连接数
    ShrinkPool,
    /// 扩大每个引擎的常驻连接数
    GrowPool,
    /// 清理过期缓存
    SweepCache,
}

/// 优化器使用的指标
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OptimizerInputs {
    pub health: HealthInputs,
    pub predicted_load: f64,
    pub pool_size: u32,
    pub max_pool_size: u32,
}

/// 一次优化的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub actions: Vec<Tuning>,
    pub details: Vec<String>,
}

/// 根据指标生成调优建议
pub fn recommend(inputs: &OptimizerInputs, thresholds: &ThresholdConfig) -> Vec<Tuning> {
    let health = &inputs.health;
    let mut actions = Vec::new();

    let error_rate_high = health.outcomes >= thresholds.min_outcomes && health.error_rate > thresholds.error_rate;
    if error_rate_high || health.cpu_percent > thresholds.cpu_percent {
        actions.push(Tuning::ReduceConcurrency);
    }

    if health.memory_percent > thresholds.memory_percent {
        if inputs.pool_size > 1 {
            actions.push(Tuning::ShrinkPool);
        }
    } else if health.utilization > 80.0
        && inputs.predicted_load > 80.0
        && inputs.pool_size < inputs.max_pool_size
        && !error_rate_high
    {
        actions.push(Tuning::GrowPool);
    }

    if health.cache_lookups >= thresholds.min_outcomes as u64 && health.cache_hit_rate < thresholds.cache_hit_rate {
        actions.push(Tuning::SweepCache);
    }
    actions
}

/// 缩小后的常驻连接数（减少 1/4，至少为 1）
pub fn shrunk_pool_size(size: u32) -> u32 {
    (size - size / 4).min(size.saturating_sub(1)).max(1)
}

/// 扩大后的常驻连接数（增加 1/4，不超过上限）
pub fn grown_pool_size(size: u32, max: u32) -> u32 {
    (size + (size / 4).max(1)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(health: HealthInputs) -> OptimizerInputs {
        OptimizerInputs {
            health,
            predicted_load: 50.0,
            pool_size: 10,
            max_pool_size: 100,
        }
    }

    #[test]
    fn test_calm_system_needs_nothing() {
        let actions = recommend(&inputs(HealthInputs::default()), &ThresholdConfig::default());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_pressure_reduces_concurrency_and_pool() {
        let actions = recommend(
            &inputs(HealthInputs {
                cpu_percent: 95.0,
                memory_percent: 95.0,
                ..HealthInputs::default()
            }),
            &ThresholdConfig::default(),
        );
        assert_eq!(actions, vec![Tuning::ReduceConcurrency, Tuning::ShrinkPool]);
    }

    #[test]
    fn test_sustained_load_grows_pool() {
        let mut input = inputs(HealthInputs {
            utilization: 90.0,
            ..HealthInputs::default()
        });
        input.predicted_load = 85.0;
        assert_eq!(recommend(&input, &ThresholdConfig::default()), vec![Tuning::GrowPool]);

        input.pool_size = 100;
        assert!(recommend(&input, &ThresholdConfig::default()).is_empty());
    }

    #[test]
    fn test_low_hit_rate_sweeps_cache() {
        let actions = recommend(
            &inputs(HealthInputs {
                cache_hit_rate: 0.1,
                cache_lookups: 100,
                ..HealthInputs::default()
            }),
            &ThresholdConfig::default(),
        );
        assert_eq!(actions, vec![Tuning::SweepCache]);
    }

    #[test]
    fn test_pool_size_steps() {
        assert_eq!(shrunk_pool_size(10), 8);
        assert_eq!(shrunk_pool_size(2), 1);
        assert_eq!(shrunk_pool_size(1), 1);
        assert_eq!(grown_pool_size(10, 100), 12);
        assert_eq!(grown_pool_size(2, 100), 3);
        assert_eq!(grown_pool_size(99, 100), 100);
    }
}
