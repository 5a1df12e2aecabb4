//! 扩缩容判断
//!
//! 扩容：最近 10 个样本平均利用率 > 80% 或平均 CPU > 85%，且引擎数未达上限。
//! 缩容：最近 20 个样本平均利用率 < 30%，且引擎数大于 1。

use super::types::{ScalingAction, ScalingDecision};
use crate::config::PoolConfig;
use crate::metrics::MetricsSampler;

/// 根据采样历史判断扩缩容动作
pub fn evaluate(
    sampler: &MetricsSampler,
    config: &PoolConfig,
    engine_count: usize,
    max_engines: usize,
) -> ScalingDecision {
    if let Some((utilization, cpu)) = sampler.window_means(config.scale_up_window) {
        let hot_utilization = utilization > config.scale_up_utilization;
        let hot_cpu = cpu > config.scale_up_cpu;

        if hot_utilization || hot_cpu {
            if engine_count >= max_engines {
                return ScalingDecision::none(
                    format!(
                        "平均利用率 {:.1}%、平均CPU {:.1}%，但引擎数已达上限 {}",
                        utilization, cpu, max_engines
                    ),
                    utilization,
                    cpu,
                    engine_count,
                );
            }

            let reason = if hot_utilization {
                format!(
                    "最近{}个样本平均利用率 {:.1}% 超过扩容阈值 {:.1}%",
                    config.scale_up_window, utilization, config.scale_up_utilization
                )
            } else {
                format!(
                    "最近{}个样本平均CPU {:.1}% 超过扩容阈值 {:.1}%（平均利用率 {:.1}%）",
                    config.scale_up_window, cpu, config.scale_up_cpu, utilization
                )
            };

            return ScalingDecision {
                action: ScalingAction::ScaleUp,
                reason,
                utilization,
                cpu,
                engine_count,
                applied: false,
            };
        }
    }

    if let Some((utilization, cpu)) = sampler.window_means(config.scale_down_window) {
        if utilization < config.scale_down_utilization && engine_count > 1 {
            return ScalingDecision {
                action: ScalingAction::ScaleDown,
                reason: format!(
                    "最近{}个样本平均利用率 {:.1}% 低于缩容阈值 {:.1}%",
                    config.scale_down_window, utilization, config.scale_down_utilization
                ),
                utilization,
                cpu,
                engine_count,
                applied: false,
            };
        }
        return ScalingDecision::none(
            format!("平均利用率 {:.1}% 处于正常区间", utilization),
            utilization,
            cpu,
            engine_count,
        );
    }

    let (utilization, cpu) = sampler
        .window_means(sampler.len().max(1))
        .unwrap_or((0.0, 0.0));
    ScalingDecision::none(
        format!("样本不足（{}个），平均利用率 {:.1}%", sampler.len(), utilization),
        utilization,
        cpu,
        engine_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsSample, StaticProbe};
    use std::sync::Arc;

    fn sampler_with(values: &[(f64, f64)]) -> MetricsSampler {
        let sampler = MetricsSampler::new(1000, Arc::new(StaticProbe::default()));
        for (u, c) in values {
            sampler.record(MetricsSample::synthetic(*u, *c));
        }
        sampler
    }

    #[test]
    fn test_scale_up_on_utilization() {
        let sampler = sampler_with(&[(85.0, 10.0); 10]);
        let decision = evaluate(&sampler, &PoolConfig::default(), 3, 5);
        assert_eq!(decision.action, ScalingAction::ScaleUp);
        assert!(decision.reason.contains("85.0%"));
    }

    #[test]
    fn test_scale_up_on_cpu() {
        let sampler = sampler_with(&[(50.0, 90.0); 10]);
        let decision = evaluate(&sampler, &PoolConfig::default(), 1, 5);
        assert_eq!(decision.action, ScalingAction::ScaleUp);
        assert!(decision.reason.contains("50.0%"));
    }

    #[test]
    fn test_no_scale_up_at_cap_or_with_few_samples() {
        let sampler = sampler_with(&[(95.0, 10.0); 10]);
        assert_eq!(evaluate(&sampler, &PoolConfig::default(), 5, 5).action, ScalingAction::None);

        let sampler = sampler_with(&[(95.0, 10.0); 9]);
        assert_eq!(evaluate(&sampler, &PoolConfig::default(), 1, 5).action, ScalingAction::None);
    }

    #[test]
    fn test_scale_down_needs_twenty_samples() {
        let sampler = sampler_with(&[(10.0, 10.0); 19]);
        assert_eq!(evaluate(&sampler, &PoolConfig::default(), 2, 5).action, ScalingAction::None);

        sampler.record(MetricsSample::synthetic(10.0, 10.0));
        assert_eq!(evaluate(&sampler, &PoolConfig::default(), 2, 5).action, ScalingAction::ScaleDown);
        assert_eq!(evaluate(&sampler, &PoolConfig::default(), 1, 5).action, ScalingAction::None);
    }
}
