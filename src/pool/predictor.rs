//! 负载预测器
//!
//! 结合最近趋势与按小时、按星期的历史利用率给出下一周期的预测负载（百分比）。
//! 预测仅供参考，是否据此调整由调用方决定。

use chrono::{Datelike, Local, Timelike};
use parking_lot::Mutex;
use std::collections::VecDeque;

const HOURS: usize = 24;
const DAYS: usize = 7;
const HOUR_BUCKET_CAP: usize = 50;
const DAY_BUCKET_CAP: usize = 100;
const RECENT_CAP: usize = 100;
const MIN_SAMPLES: usize = 5;
/// 样本不足时的中性预测值
pub const NEUTRAL_LOAD: f64 = 50.0;

/// 有界样本桶
#[derive(Debug, Clone)]
struct Bucket {
    cap: usize,
    values: VecDeque<f64>,
}

impl Bucket {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            values: VecDeque::with_capacity(cap),
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() >= self.cap {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
        }
    }
}

#[derive(Debug)]
struct PredictorState {
    hourly: Vec<Bucket>,
    daily: Vec<Bucket>,
    recent: Bucket,
}

/// 负载预测器
#[derive(Debug)]
pub struct LoadPredictor {
    state: Mutex<PredictorState>,
}

impl LoadPredictor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PredictorState {
                hourly: (0..HOURS).map(|_| Bucket::new(HOUR_BUCKET_CAP)).collect(),
                daily: (0..DAYS).map(|_| Bucket::new(DAY_BUCKET_CAP)).collect(),
                recent: Bucket::new(RECENT_CAP),
            }),
        }
    }

    /// 以本地时间记录一次利用率
    pub fn record(&self, utilization: f64) {
        let now = Local::now();
        self.record_at(utilization, now.hour(), now.weekday().num_days_from_monday());
    }

    /// 按指定小时（0-23）与星期（0=周一）记录利用率
    pub fn record_at(&self, utilization: f64, hour: u32, weekday: u32) {
        let value = utilization.clamp(0.0, 100.0);
        let mut state = self.state.lock();
        state.hourly[hour as usize % HOURS].push(value);
        state.daily[weekday as usize % DAYS].push(value);
        state.recent.push(value);
    }

    /// 预测下一周期的负载，结果位于 [0, 100]
    pub fn predict_next_load(&self) -> f64 {
        let now = Local::now();
        self.predict_at(now.hour(), now.weekday().num_days_from_monday())
    }

    /// 按指定小时与星期预测负载
    ///
    /// 0.4*最新值 + 0.3*小时均值 + 0.2*星期均值 + 0.1*趋势，
    /// 趋势 = 最近5个样本均值 - 之前5个样本均值
    pub fn predict_at(&self, hour: u32, weekday: u32) -> f64 {
        let state = self.state.lock();
        let recent = &state.recent.values;
        if recent.len() < MIN_SAMPLES {
            return NEUTRAL_LOAD;
        }

        let most_recent = recent.back().copied().unwrap_or(NEUTRAL_LOAD);
        let hour_avg = state.hourly[hour as usize % HOURS].mean().unwrap_or(most_recent);
        let day_avg = state.daily[weekday as usize % DAYS].mean().unwrap_or(most_recent);
        let trend = recent_trend(recent);

        let predicted = 0.4 * most_recent + 0.3 * hour_avg + 0.2 * day_avg + 0.1 * trend;
        if predicted.is_finite() {
            predicted.clamp(0.0, 100.0)
        } else {
            NEUTRAL_LOAD
        }
    }

    /// 已记录的近期样本数
    pub fn sample_count(&self) -> usize {
        self.state.lock().recent.values.len()
    }
}

impl Default for LoadPredictor {
    fn default() -> Self {
        Self::new()
    }
}

/// mean(last5) - mean(prev5)，样本不足10个时为0
fn recent_trend(recent: &VecDeque<f64>) -> f64 {
    if recent.len() < MIN_SAMPLES * 2 {
        return 0.0;
    }
    let n = recent.len();
    let last5 = recent.range(n - MIN_SAMPLES..).sum::<f64>() / MIN_SAMPLES as f64;
    let prev5 = recent.range(n - MIN_SAMPLES * 2..n - MIN_SAMPLES).sum::<f64>() / MIN_SAMPLES as f64;
    last5 - prev5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_when_few_samples() {
        let predictor = LoadPredictor::new();
        assert_eq!(predictor.predict_next_load(), NEUTRAL_LOAD);
        for _ in 0..4 {
            predictor.record(90.0);
        }
        assert_eq!(predictor.predict_next_load(), NEUTRAL_LOAD);
    }

    #[test]
    fn test_weighted_blend() {
        let predictor = LoadPredictor::new();
        // 前5个样本 40，后5个样本 60，全部落在 10 点 / 周三
        for _ in 0..5 {
            predictor.record_at(40.0, 10, 2);
        }
        for _ in 0..5 {
            predictor.record_at(60.0, 10, 2);
        }
        // 0.4*60 + 0.3*50 + 0.2*50 + 0.1*20 = 51
        let predicted = predictor.predict_at(10, 2);
        assert!((predicted - 51.0).abs() < 1e-9, "预测值: {}", predicted);
    }

    #[test]
    fn test_prediction_is_clamped() {
        let predictor = LoadPredictor::new();
        for _ in 0..10 {
            predictor.record_at(150.0, 3, 0);
        }
        let predicted = predictor.predict_at(3, 0);
        assert!((0.0..=100.0).contains(&predicted));

        let predictor = LoadPredictor::new();
        for _ in 0..10 {
            predictor.record_at(-20.0, 3, 0);
        }
        assert_eq!(predictor.predict_at(3, 0), 0.0);
    }

    #[test]
    fn test_hour_bucket_is_bounded() {
        let predictor = LoadPredictor::new();
        for i in 0..200 {
            predictor.record_at(i as f64 % 100.0, 5, 1);
        }
        let state = predictor.state.lock();
        assert_eq!(state.hourly[5].values.len(), HOUR_BUCKET_CAP);
        assert_eq!(state.daily[1].values.len(), DAY_BUCKET_CAP);
    }
}
