//! 准入凭证
//!
//! 通过准入检查后得到 [`Admission`]，请求结束时用 `success`/`failure` 回写结果。
//! 凭证未回写就被释放（调用方取消、外层超时）时只归还半开试探名额，不计入成功或失败。

use super::CircuitBreaker;
use rat_logger::debug;
use std::sync::Arc;

/// 一次被放行的请求
#[derive(Debug)]
pub struct Admission {
    breaker: Arc<CircuitBreaker>,
    endpoint: String,
    /// 占用半开名额时记录当时的打开次数，用于识别过期名额
    half_open_trip: Option<u64>,
    resolved: bool,
}

impl Admission {
    pub(crate) fn new(breaker: Arc<CircuitBreaker>, endpoint: &str, half_open_trip: Option<u64>) -> Self {
        Self {
            breaker,
            endpoint: endpoint.to_string(),
            half_open_trip,
            resolved: false,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 是否占用了半开试探名额
    pub fn is_trial(&self) -> bool {
        self.half_open_trip.is_some()
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success(&self.endpoint);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure(&self.endpoint);
    }

    /// 不回写结果，只归还名额（如请求由缓存应答）
    pub fn release(mut self) {
        self.resolved = true;
        self.return_slot();
    }

    fn return_slot(&self) {
        if let Some(trip) = self.half_open_trip {
            self.breaker.release_trial(&self.endpoint, trip);
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if !self.resolved {
            debug!("准入凭证未回写结果即被释放: endpoint={}", self.endpoint);
            self.return_slot();
        }
    }
}
