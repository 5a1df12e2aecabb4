//! 连接泄漏检测
//!
//! 记录每次借出的时间，周期扫描时把超过阈值仍未归还的连接判定为泄漏，
//! 删除记录并交由连接池强制回收。借出/归还只做一次并发映射写入，不会阻塞调用方。

use dashmap::DashMap;
use rat_logger::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, Instant};

/// 连接标识（引擎ID + 连接ID）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub engine_id: u32,
    pub connection_id: u64,
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{}/conn-{}", self.engine_id, self.connection_id)
    }
}

/// 连接泄漏检测器
#[derive(Debug)]
pub struct LeakDetector {
    threshold: Duration,
    records: DashMap<ConnectionHandle, Instant>,
    recovered_leaks: AtomicU64,
}

impl LeakDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            records: DashMap::new(),
            recovered_leaks: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// 记录借出
    pub fn track_checkout(&self, handle: ConnectionHandle) {
        self.records.insert(handle, Instant::now());
    }

    /// 记录归还，返回记录是否存在
    pub fn track_checkin(&self, handle: ConnectionHandle) -> bool {
        self.records.remove(&handle).is_some()
    }

    /// 扫描泄漏，返回需要回收的连接
    pub fn check_for_leaks(&self) -> Vec<ConnectionHandle> {
        let now = Instant::now();
        let candidates: Vec<ConnectionHandle> = self
            .records
            .iter()
            .filter(|r| now.saturating_duration_since(*r.value()) > self.threshold)
            .map(|r| *r.key())
            .collect();

        let mut leaked = Vec::with_capacity(candidates.len());
        for handle in candidates {
            let removed = self.records.remove_if(&handle, |_, checked_out_at| {
                now.saturating_duration_since(*checked_out_at) > self.threshold
            });
            if let Some((_, checked_out_at)) = removed {
                self.recovered_leaks.fetch_add(1, Ordering::Relaxed);
                let err = crate::shield_error!(leak, handle);
                warn!(
                    "{}，已持有 {:.0}s，强制回收",
                    err,
                    now.saturating_duration_since(checked_out_at).as_secs_f64()
                );
                leaked.push(handle);
            }
        }
        leaked
    }

    /// 已回收的泄漏总数
    pub fn recovered_leaks(&self) -> u64 {
        self.recovered_leaks.load(Ordering::Relaxed)
    }

    /// 当前跟踪中的借出数
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    /// 当前最久借出时长
    pub fn oldest_checkout_age(&self) -> Option<Duration> {
        let now = Instant::now();
        self.records
            .iter()
            .map(|r| now.saturating_duration_since(*r.value()))
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> ConnectionHandle {
        ConnectionHandle {
            engine_id: 0,
            connection_id: id,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_leak_detected_after_threshold() {
        let detector = LeakDetector::new(Duration::from_secs(300));
        detector.track_checkout(handle(1));
        detector.track_checkout(handle(2));
        assert!(detector.track_checkin(handle(2)));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(detector.check_for_leaks().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(detector.check_for_leaks(), vec![handle(1)]);
        assert_eq!(detector.recovered_leaks(), 1);
        assert_eq!(detector.tracked(), 0);

        // 重复扫描不会重复计数
        assert!(detector.check_for_leaks().is_empty());
        assert_eq!(detector.recovered_leaks(), 1);
        assert!(!detector.track_checkin(handle(1)));
    }
}
