//! # 指标采样模块
//!
//! 周期性采集连接池与主机资源状态，写入固定容量的环形缓冲区（最旧样本被淘汰）。
//! 样本严格按写入顺序排列，可被多个读方并发读取。

pub mod host;
pub mod sample;

pub use host::{HostProbe, StaticProbe, SysinfoProbe};
pub use sample::{HostReading, MetricsSample, PoolStats};

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// 指标采样器
pub struct MetricsSampler {
    capacity: usize,
    buffer: RwLock<VecDeque<MetricsSample>>,
    probe: Arc<dyn HostProbe>,
}

impl std::fmt::Debug for MetricsSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSampler")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl MetricsSampler {
    /// 创建采样器
    ///
    /// # 参数
    ///
    /// * `capacity` - 环形缓冲区容量（至少为1）
    /// * `probe` - 主机资源探测器
    pub fn new(capacity: usize, probe: Arc<dyn HostProbe>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            probe,
        }
    }

    /// 采集一次样本并写入缓冲区
    pub fn sample(&self, pool: PoolStats) -> MetricsSample {
        let sample = MetricsSample::new(pool, self.probe.read());
        self.record(sample.clone());
        sample
    }

    /// 写入一条已有样本
    pub fn record(&self, sample: MetricsSample) {
        let mut buffer = self.buffer.write();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(sample);
    }

    /// 最近 n 条样本（按时间顺序）
    pub fn recent(&self, n: usize) -> Vec<MetricsSample> {
        let buffer = self.buffer.read();
        let skip = buffer.len().saturating_sub(n);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// 最新样本
    pub fn latest(&self) -> Option<MetricsSample> {
        self.buffer.read().back().cloned()
    }

    /// 最近 n 条样本的平均利用率与平均CPU，样本不足 n 条时返回 None
    pub fn window_means(&self, n: usize) -> Option<(f64, f64)> {
        if n == 0 {
            return None;
        }
        let window = self.recent(n);
        if window.len() < n {
            return None;
        }
        let count = window.len() as f64;
        let utilization = window.iter().map(|s| s.utilization).sum::<f64>() / count;
        let cpu = window.iter().map(|s| s.cpu_percent).sum::<f64>() / count;
        Some((utilization, cpu))
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.buffer.write().clear();
    }
}
