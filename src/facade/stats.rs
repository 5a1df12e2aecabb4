//! 请求统计与滚动错误率窗口

use crate::error::ShieldError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, Instant};

/// 错误率统计窗口
pub const OUTCOME_WINDOW: Duration = Duration::from_secs(300);
const OUTCOME_CAP: usize = 10_000;

/// 统计快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStatsSnapshot {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// 熔断或削减导致的快速拒绝
    pub rejected: u64,
    pub timeouts: u64,
    pub cache_hits: u64,
    pub sessions: u64,
    pub bulk_batches: u64,
    /// 平均执行耗时（毫秒）
    pub avg_exec_ms: f64,
    /// 最近5分钟错误率（0-1）
    pub recent_error_rate: f64,
    pub recent_outcomes: usize,
}

/// 请求统计
#[derive(Debug, Default)]
pub struct OperationStats {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    timeouts: AtomicU64,
    cache_hits: AtomicU64,
    sessions: AtomicU64,
    bulk_batches: AtomicU64,
    exec_micros: AtomicU64,
    timed: AtomicU64,
    /// (时间, 是否成功)
    outcomes: Mutex<VecDeque<(Instant, bool)>>,
}

impl OperationStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_outcome(&self, ok: bool) {
        let now = Instant::now();
        let mut outcomes = self.outcomes.lock();
        prune(&mut outcomes, now);
        if outcomes.len() >= OUTCOME_CAP {
            outcomes.pop_front();
        }
        outcomes.push_back((now, ok));
    }

    pub fn record_success(&self, exec_time: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.exec_micros
            .fetch_add(exec_time.as_micros() as u64, Ordering::Relaxed);
        self.timed.fetch_add(1, Ordering::Relaxed);
        self.push_outcome(true);
    }

    pub fn record_cache_hit(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.push_outcome(true);
    }

    pub fn record_failure(&self, error: &ShieldError) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        if matches!(error, ShieldError::Timeout { .. } | ShieldError::AcquisitionTimeout { .. }) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.push_outcome(false);
    }

    /// 快速拒绝不计入错误率
    pub fn record_rejected(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bulk_batch(&self) {
        self.bulk_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// 最近窗口内的 (错误率, 结果数)
    pub fn recent_error_rate(&self) -> (f64, usize) {
        let mut outcomes = self.outcomes.lock();
        prune(&mut outcomes, Instant::now());
        let count = outcomes.len();
        if count == 0 {
            return (0.0, 0);
        }
        let failed = outcomes.iter().filter(|(_, ok)| !ok).count();
        (failed as f64 / count as f64, count)
    }

    pub fn snapshot(&self) -> OperationStatsSnapshot {
        let timed = self.timed.load(Ordering::Relaxed);
        let avg_exec_ms = if timed == 0 {
            0.0
        } else {
            self.exec_micros.load(Ordering::Relaxed) as f64 / timed as f64 / 1000.0
        };
        let (recent_error_rate, recent_outcomes) = self.recent_error_rate();

        OperationStatsSnapshot {
            total_requests: self.total.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            bulk_batches: self.bulk_batches.load(Ordering::Relaxed),
            avg_exec_ms,
            recent_error_rate,
            recent_outcomes,
        }
    }
}

fn prune(outcomes: &mut VecDeque<(Instant, bool)>, now: Instant) {
    while let Some((at, _)) = outcomes.front() {
        if now.saturating_duration_since(*at) > OUTCOME_WINDOW {
            outcomes.pop_front();
        } else {
            break;
        }
    }
}
