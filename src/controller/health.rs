//! 健康评估

use crate::config::ThresholdConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// 健康评估的输入
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HealthInputs {
    /// 连接池利用率（百分比）
    pub utilization: f64,
    /// 最近窗口错误率（0-1）
    pub error_rate: f64,
    /// 最近窗口结果数
    pub outcomes: usize,
    pub open_circuits: usize,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// 缓存命中率（0-1）
    pub cache_hit_rate: f64,
    pub cache_lookups: u64,
}

/// 健康报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// 0-100
    pub score: f64,
    pub status: HealthStatus,
    pub error_rate: f64,
    pub issues: Vec<String>,
    /// 是否需要进入紧急模式
    pub emergency: bool,
    pub evaluated_at: DateTime<Utc>,
}

/// 健康监控器
#[derive(Debug)]
pub struct HealthMonitor {
    thresholds: ThresholdConfig,
    last: Mutex<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            last: Mutex::new(None),
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// 计算健康分并保存为最近一次报告
    pub fn evaluate(&self, inputs: &HealthInputs) -> HealthReport {
        let t = &self.thresholds;
        let mut score = 100.0;
        let mut issues = Vec::new();

        if inputs.utilization > 90.0 {
            score -= 20.0;
            issues.push(format!("连接池利用率过高: {:.1}%", inputs.utilization));
        } else if inputs.utilization > 80.0 {
            score -= 10.0;
            issues.push(format!("连接池利用率偏高: {:.1}%", inputs.utilization));
        }

        let error_rate_known = inputs.outcomes >= t.min_outcomes;
        if error_rate_known && inputs.error_rate > t.error_rate {
            score -= (inputs.error_rate * 100.0).min(40.0);
            issues.push(format!("错误率过高: {:.1}%", inputs.error_rate * 100.0));
        }

        if inputs.open_circuits > 0 {
            score -= (inputs.open_circuits as f64 * 10.0).min(30.0);
            issues.push(format!("熔断器打开的端点数: {}", inputs.open_circuits));
        }

        if inputs.cpu_percent > t.cpu_percent {
            score -= 15.0;
            issues.push(format!("CPU使用率过高: {:.1}%", inputs.cpu_percent));
        }
        if inputs.memory_percent > t.memory_percent {
            score -= 10.0;
            issues.push(format!("内存使用率过高: {:.1}%", inputs.memory_percent));
        }

        if inputs.cache_lookups >= t.min_outcomes as u64 && inputs.cache_hit_rate < t.cache_hit_rate {
            score -= 5.0;
            issues.push(format!("缓存命中率偏低: {:.1}%", inputs.cache_hit_rate * 100.0));
        }

        let score: f64 = score.clamp(0.0, 100.0);
        let status = if score < t.critical_health_score {
            HealthStatus::Critical
        } else if score < 70.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let emergency = score < t.critical_health_score
            || (error_rate_known && inputs.error_rate > t.emergency_error_rate);

        let report = HealthReport {
            score,
            status,
            error_rate: inputs.error_rate,
            issues,
            emergency,
            evaluated_at: Utc::now(),
        };
        *self.last.lock() = Some(report.clone());
        report
    }

    /// 最近一次健康报告
    pub fn last_report(&self) -> Option<HealthReport> {
        self.last.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(ThresholdConfig::default())
    }

    #[test]
    fn test_quiet_system_is_healthy() {
        let report = monitor().evaluate(&HealthInputs {
            utilization: 20.0,
            cpu_percent: 10.0,
            memory_percent: 30.0,
            ..HealthInputs::default()
        });
        assert_eq!(report.score, 100.0);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(!report.emergency);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_error_rate_above_half_forces_emergency() {
        let report = monitor().evaluate(&HealthInputs {
            error_rate: 0.6,
            outcomes: 20,
            ..HealthInputs::default()
        });
        assert!(report.emergency);
        assert_eq!(report.score, 60.0);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_few_outcomes_do_not_count() {
        let report = monitor().evaluate(&HealthInputs {
            error_rate: 1.0,
            outcomes: 3,
            ..HealthInputs::default()
        });
        assert!(!report.emergency);
        assert_eq!(report.score, 100.0);
    }

    #[test]
    fn test_compound_pressure_is_critical() {
        let monitor = monitor();
        let report = monitor.evaluate(&HealthInputs {
            utilization: 95.0,
            error_rate: 0.3,
            outcomes: 50,
            open_circuits: 3,
            cpu_percent: 95.0,
            memory_percent: 95.0,
            ..HealthInputs::default()
        });
        assert!(report.score < 30.0);
        assert_eq!(report.status, HealthStatus::Critical);
        assert!(report.emergency);
        assert_eq!(monitor.last_report(), Some(report));
    }
}
