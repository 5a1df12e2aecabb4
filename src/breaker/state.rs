//! 端点熔断状态

use crate::config::BreakerConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::time::{Duration, Instant};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// 关闭：放行所有请求
    Closed,
    /// 打开：立即拒绝所有请求
    Open,
    /// 半开：放行有限的试探请求
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个端点的熔断状态，仅由熔断器在持锁时修改
#[derive(Debug)]
pub struct EndpointCircuit {
    pub(crate) endpoint: String,
    pub(crate) state: CircuitState,
    /// 自上次恢复以来的失败总数
    pub(crate) failure_count: u32,
    /// 当前自适应阈值
    pub(crate) threshold: u32,
    /// 最近一小时的失败时间戳
    pub(crate) failures: VecDeque<Instant>,
    /// 连续恢复失败次数（决定退避指数）
    pub(crate) recovery_attempts: u32,
    pub(crate) last_transition: Instant,
    pub(crate) opened_at: Option<Instant>,
    /// 本次打开时确定的恢复超时
    pub(crate) recovery_timeout: Duration,
    pub(crate) half_open_successes: u32,
    pub(crate) half_open_in_flight: u32,
    pub(crate) rejected_requests: u64,
    pub(crate) trip_count: u64,
}

impl EndpointCircuit {
    pub(crate) fn new(endpoint: &str, config: &BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            threshold: config.initial_threshold,
            failures: VecDeque::new(),
            recovery_attempts: 0,
            last_transition: Instant::now(),
            opened_at: None,
            recovery_timeout: Duration::ZERO,
            half_open_successes: 0,
            half_open_in_flight: 0,
            rejected_requests: 0,
            trip_count: 0,
        }
    }

    /// 丢弃超出历史窗口的失败记录
    pub(crate) fn prune(&mut self, now: Instant, history_window: Duration) {
        while let Some(front) = self.failures.front() {
            if now.saturating_duration_since(*front) > history_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// 统计窗口内的失败次数
    pub(crate) fn failures_within(&self, now: Instant, window: Duration) -> usize {
        self.failures
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) <= window)
            .count()
    }

    /// 根据近期失败与小时失败的比例调整阈值
    pub(crate) fn adapt_threshold(&mut self, now: Instant, config: &BreakerConfig) {
        let hourly = self.failures.len();
        if hourly < config.adaptation_min_samples {
            return;
        }
        let recent = self.failures_within(now, Duration::from_secs(config.failure_window_secs));

        if recent as f64 > hourly as f64 * 0.5 {
            self.threshold = self.threshold.saturating_sub(1).max(config.min_threshold);
        } else if (recent as f64) < hourly as f64 * 0.1 {
            self.threshold = (self.threshold + 1).min(config.max_threshold);
        }
    }

    /// 计算恢复超时：min(max, base * 2^min(attempts, 4))，附带 ±jitter 抖动
    pub(crate) fn compute_recovery_timeout(&self, config: &BreakerConfig) -> Duration {
        let exponent = self.recovery_attempts.min(4);
        let base = (config.base_recovery_secs.saturating_mul(1u64 << exponent))
            .min(config.max_recovery_secs) as f64;

        let jitter = if config.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-config.jitter_ratio..=config.jitter_ratio)
        } else {
            0.0
        };

        Duration::from_secs_f64((base * (1.0 + jitter)).max(0.0))
    }

    pub(crate) fn transition_to_open(&mut self, now: Instant, config: &BreakerConfig) {
        self.recovery_timeout = self.compute_recovery_timeout(config);
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.last_transition = now;
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
        self.trip_count += 1;
    }

    pub(crate) fn transition_to_half_open(&mut self, now: Instant) {
        self.state = CircuitState::HalfOpen;
        self.last_transition = now;
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
    }

    pub(crate) fn transition_to_closed(&mut self, now: Instant) {
        self.state = CircuitState::Closed;
        self.last_transition = now;
        self.opened_at = None;
        self.failure_count = 0;
        self.recovery_attempts = 0;
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
        self.failures.clear();
    }

    /// 距离允许重试的剩余时间（仅打开状态）
    pub(crate) fn remaining_open(&self, now: Instant) -> Option<Duration> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some((opened_at + self.recovery_timeout).saturating_duration_since(now))
            }
            _ => None,
        }
    }

    pub(crate) fn snapshot(&self, now: Instant, config: &BreakerConfig) -> CircuitSnapshot {
        CircuitSnapshot {
            endpoint: self.endpoint.clone(),
            state: self.state,
            failure_count: self.failure_count,
            threshold: self.threshold,
            recent_failures: self.failures_within(now, Duration::from_secs(config.failure_window_secs)),
            hourly_failures: self.failures.len(),
            recovery_attempts: self.recovery_attempts,
            half_open_successes: self.half_open_successes,
            half_open_in_flight: self.half_open_in_flight,
            recovery_timeout_secs: self.recovery_timeout.as_secs_f64(),
            retry_in_secs: self.remaining_open(now).map(|d| d.as_secs_f64()),
            seconds_in_state: now.saturating_duration_since(self.last_transition).as_secs_f64(),
            rejected_requests: self.rejected_requests,
            trip_count: self.trip_count,
        }
    }
}

/// 端点熔断状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub endpoint: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    /// 失败窗口内的失败数
    pub recent_failures: usize,
    /// 历史窗口内的失败数
    pub hourly_failures: usize,
    pub recovery_attempts: u32,
    pub half_open_successes: u32,
    /// 已放行但尚未回写结果的半开试探数
    pub half_open_in_flight: u32,
    pub recovery_timeout_secs: f64,
    pub retry_in_secs: Option<f64>,
    pub seconds_in_state: f64,
    pub rejected_requests: u64,
    pub trip_count: u64,
}
