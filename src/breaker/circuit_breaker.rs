//! 按端点隔离的熔断器
//!
//! 每个端点持有独立的状态机，状态变更在端点锁内线性化。

use super::admission::Admission;
use super::state::{CircuitSnapshot, CircuitState, EndpointCircuit};
use crate::config::BreakerConfig;
use crate::error::ShieldResult;
use dashmap::DashMap;
use parking_lot::Mutex;
use rat_logger::{info, warn};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// 熔断器
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    circuits: DashMap<String, Arc<Mutex<EndpointCircuit>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// 获取（必要时创建）端点状态
    fn circuit(&self, endpoint: &str) -> Arc<Mutex<EndpointCircuit>> {
        if let Some(existing) = self.circuits.get(endpoint) {
            return existing.value().clone();
        }
        self.circuits
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(EndpointCircuit::new(endpoint, &self.config))))
            .value()
            .clone()
    }

    /// 判断是否放行请求（唯一的准入检查）
    ///
    /// 打开状态下恢复超时到期后，下一个请求会把端点切换为半开并被放行
    pub fn should_allow_request(&self, endpoint: &str) -> bool {
        self.try_admit(endpoint).is_some()
    }

    /// 放行时返回 `Some`，内层为占用半开名额时的打开次数
    fn try_admit(&self, endpoint: &str) -> Option<Option<u64>> {
        let circuit = self.circuit(endpoint);
        let mut circuit = circuit.lock();
        let now = Instant::now();

        match circuit.state {
            CircuitState::Open => {
                let expired = circuit
                    .opened_at
                    .map(|opened_at| now >= opened_at + circuit.recovery_timeout)
                    .unwrap_or(true);
                if expired {
                    circuit.transition_to_half_open(now);
                    circuit.half_open_in_flight = 1;
                    info!("熔断器进入半开状态: endpoint={}", endpoint);
                    Some(Some(circuit.trip_count))
                } else {
                    circuit.rejected_requests += 1;
                    None
                }
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_in_flight < self.config.half_open_max_requests {
                    circuit.half_open_in_flight += 1;
                    Some(Some(circuit.trip_count))
                } else {
                    circuit.rejected_requests += 1;
                    None
                }
            }
            CircuitState::Closed => Some(None),
        }
    }

    /// 准入检查并返回凭证，拒绝时返回 `Unavailable`
    pub fn admit(self: &Arc<Self>, endpoint: &str) -> ShieldResult<Admission> {
        match self.try_admit(endpoint) {
            Some(trip) => Ok(Admission::new(Arc::clone(self), endpoint, trip)),
            None => Err(crate::shield_error!(unavailable, endpoint)),
        }
    }

    /// 归还未回写结果的半开名额，端点已离开该次半开时忽略
    pub(crate) fn release_trial(&self, endpoint: &str, trip: u64) {
        let Some(circuit) = self.circuits.get(endpoint).map(|c| c.value().clone()) else {
            return;
        };
        let mut circuit = circuit.lock();
        if circuit.state == CircuitState::HalfOpen && circuit.trip_count == trip {
            circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
        }
    }

    /// 准入检查，拒绝时返回 `Unavailable`
    pub fn check(&self, endpoint: &str) -> ShieldResult<()> {
        if self.should_allow_request(endpoint) {
            Ok(())
        } else {
            Err(crate::shield_error!(unavailable, endpoint))
        }
    }

    /// 记录成功
    pub fn record_success(&self, endpoint: &str) {
        let circuit = self.circuit(endpoint);
        let mut circuit = circuit.lock();
        let now = Instant::now();

        match circuit.state {
            CircuitState::Closed => {
                circuit.prune(now, Duration::from_secs(self.config.history_window_secs));
            }
            CircuitState::HalfOpen => {
                circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.half_open_success_threshold {
                    circuit.transition_to_closed(now);
                    info!("熔断器已恢复关闭: endpoint={}", endpoint);
                }
            }
            // 打开状态下的迟到结果不影响状态
            CircuitState::Open => {}
        }
    }

    /// 记录失败
    pub fn record_failure(&self, endpoint: &str) {
        let circuit = self.circuit(endpoint);
        let mut circuit = circuit.lock();
        let now = Instant::now();

        circuit.failures.push_back(now);
        circuit.prune(now, Duration::from_secs(self.config.history_window_secs));

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                circuit.adapt_threshold(now, &self.config);

                let recent =
                    circuit.failures_within(now, Duration::from_secs(self.config.failure_window_secs));
                if recent >= circuit.threshold as usize {
                    circuit.transition_to_open(now, &self.config);
                    warn!(
                        "熔断器打开: endpoint={}, 窗口内失败={}, 阈值={}, 恢复超时={:.1}s",
                        endpoint,
                        recent,
                        circuit.threshold,
                        circuit.recovery_timeout.as_secs_f64()
                    );
                }
            }
            CircuitState::HalfOpen => {
                circuit.failure_count += 1;
                circuit.recovery_attempts += 1;
                circuit.transition_to_open(now, &self.config);
                warn!(
                    "半开试探失败，熔断器重新打开: endpoint={}, 恢复尝试={}, 恢复超时={:.1}s",
                    endpoint,
                    circuit.recovery_attempts,
                    circuit.recovery_timeout.as_secs_f64()
                );
            }
            // 已打开的端点不会重复计数
            CircuitState::Open => {}
        }
    }

    /// 当前状态（未知端点视为关闭）
    pub fn state(&self, endpoint: &str) -> CircuitState {
        self.circuits
            .get(endpoint)
            .map(|c| c.value().lock().state)
            .unwrap_or(CircuitState::Closed)
    }

    /// 当前自适应阈值
    pub fn threshold(&self, endpoint: &str) -> u32 {
        self.circuits
            .get(endpoint)
            .map(|c| c.value().lock().threshold)
            .unwrap_or(self.config.initial_threshold)
    }

    pub fn snapshot(&self, endpoint: &str) -> Option<CircuitSnapshot> {
        let circuit = self.circuits.get(endpoint)?.value().clone();
        let snapshot = circuit.lock().snapshot(Instant::now(), &self.config);
        Some(snapshot)
    }

    /// 所有端点快照（按端点名排序）
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let now = Instant::now();
        let circuits: Vec<_> = self.circuits.iter().map(|c| c.value().clone()).collect();
        let mut snapshots: Vec<_> = circuits
            .iter()
            .map(|c| c.lock().snapshot(now, &self.config))
            .collect();
        snapshots.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        snapshots
    }

    /// 处于打开状态的端点数
    pub fn open_circuits(&self) -> usize {
        let circuits: Vec<_> = self.circuits.iter().map(|c| c.value().clone()).collect();
        circuits
            .iter()
            .filter(|c| c.lock().state == CircuitState::Open)
            .count()
    }

    /// 人工重置端点
    pub fn reset(&self, endpoint: &str) {
        if let Some(circuit) = self.circuits.get(endpoint).map(|c| c.value().clone()) {
            let mut circuit = circuit.lock();
            circuit.transition_to_closed(Instant::now());
            circuit.threshold = self.config.initial_threshold;
            info!("熔断器已人工重置: endpoint={}", endpoint);
        }
    }
}
