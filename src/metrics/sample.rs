//! 指标样本定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 连接池负载快照（所有引擎聚合）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// 基础连接数之和
    pub size: u32,
    /// 已借出连接数
    pub checked_out: u32,
    /// 当前溢出连接数
    pub overflow: u32,
}

impl PoolStats {
    /// 利用率百分比：checked_out / (size + overflow)
    pub fn utilization(&self) -> f64 {
        let capacity = self.size + self.overflow;
        if capacity == 0 {
            0.0
        } else {
            (self.checked_out as f64 / capacity as f64 * 100.0).min(100.0)
        }
    }
}

/// 主机资源读数
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostReading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_io_bytes: u64,
    pub network_io_bytes: u64,
}

/// 一次指标采样，写入后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub pool_size: u32,
    pub checked_out: u32,
    pub overflow: u32,
    /// 利用率百分比
    pub utilization: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_io_bytes: u64,
    pub network_io_bytes: u64,
}

impl MetricsSample {
    /// 由连接池快照和主机读数组装样本
    pub fn new(pool: PoolStats, host: HostReading) -> Self {
        Self {
            timestamp: Utc::now(),
            pool_size: pool.size,
            checked_out: pool.checked_out,
            overflow: pool.overflow,
            utilization: pool.utilization(),
            cpu_percent: host.cpu_percent,
            memory_percent: host.memory_percent,
            disk_io_bytes: host.disk_io_bytes,
            network_io_bytes: host.network_io_bytes,
        }
    }

    /// 仅指定利用率与CPU的合成样本，供扩缩容决策测试和离线回放使用
    pub fn synthetic(utilization: f64, cpu_percent: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            pool_size: 0,
            checked_out: 0,
            overflow: 0,
            utilization: utilization.clamp(0.0, 100.0),
            cpu_percent,
            memory_percent: 0.0,
            disk_io_bytes: 0,
            network_io_bytes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_includes_overflow() {
        let stats = PoolStats {
            size: 10,
            checked_out: 9,
            overflow: 2,
        };
        assert!((stats.utilization() - 75.0).abs() < 1e-9);
        assert_eq!(PoolStats::default().utilization(), 0.0);
    }
}
