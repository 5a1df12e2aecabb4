//! 连接池管理器
//!
//! 持有 1 到 N 个引擎（主引擎总是最先创建，其余只通过扩容加入），按请求优先级选择引擎，
//! 并依据采样历史自动扩缩容。扩缩容互斥执行，失败只记录日志，系统继续使用现有引擎。

use super::driver::DatabaseDriver;
use super::engine::{EnginePool, PooledConnection};
use super::leak_detector::LeakDetector;
use super::predictor::LoadPredictor;
use super::scaling;
use super::types::{PoolHealth, ScalingAction, ScalingDecision};
use crate::config::PoolConfig;
use crate::error::ShieldResult;
use crate::metrics::{HostProbe, MetricsSample, MetricsSampler, PoolStats};
use crate::types::Priority;
use arc_swap::ArcSwap;
use rat_logger::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 连接池管理器
pub struct ConnectionPoolManager {
    config: PoolConfig,
    driver: Arc<dyn DatabaseDriver>,
    engines: ArcSwap<Vec<Arc<EnginePool>>>,
    next_engine_id: AtomicU32,
    /// 当前运行模式允许的最大引擎数
    max_engines: AtomicUsize,
    /// 扩缩容互斥锁（单个在途操作）
    scale_lock: Mutex<()>,
    sampler: MetricsSampler,
    predictor: LoadPredictor,
    leak_detector: Arc<LeakDetector>,
    scale_ups: AtomicU64,
    scale_downs: AtomicU64,
    scaling_failures: AtomicU64,
}

impl std::fmt::Debug for ConnectionPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolManager")
            .field("engines", &self.engine_count())
            .field("max_engines", &self.max_engines())
            .field("driver", &self.driver.name())
            .finish()
    }
}

impl ConnectionPoolManager {
    /// 创建管理器并建立主引擎
    pub async fn new(
        config: PoolConfig,
        driver: Arc<dyn DatabaseDriver>,
        probe: Arc<dyn HostProbe>,
        history_capacity: usize,
    ) -> ShieldResult<Self> {
        let leak_detector = Arc::new(LeakDetector::new(config.leak_threshold()));
        let primary = EnginePool::create(
            0,
            driver.clone(),
            leak_detector.clone(),
            config.pool_size,
            config.max_overflow(),
        )
        .await?;

        info!(
            "连接池管理器初始化完成: 主引擎常驻连接={}, 最大连接={}, 最大引擎数={}",
            config.pool_size, config.max_pool_size, config.max_engines
        );

        Ok(Self {
            max_engines: AtomicUsize::new(config.max_engines),
            config,
            driver,
            engines: ArcSwap::from_pointee(vec![primary]),
            next_engine_id: AtomicU32::new(1),
            scale_lock: Mutex::new(()),
            sampler: MetricsSampler::new(history_capacity, probe),
            predictor: LoadPredictor::new(),
            leak_detector,
            scale_ups: AtomicU64::new(0),
            scale_downs: AtomicU64::new(0),
            scaling_failures: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn sampler(&self) -> &MetricsSampler {
        &self.sampler
    }

    pub fn predictor(&self) -> &LoadPredictor {
        &self.predictor
    }

    pub fn leak_detector(&self) -> &Arc<LeakDetector> {
        &self.leak_detector
    }

    pub fn engine_count(&self) -> usize {
        self.engines.load().len()
    }

    pub fn max_engines(&self) -> usize {
        self.max_engines.load(Ordering::SeqCst)
    }

    /// 主引擎
    pub fn primary(&self) -> Arc<EnginePool> {
        Arc::clone(&self.engines.load()[0])
    }

    /// 按优先级选择引擎：关键请求走主引擎，其余选择借出数最少的引擎
    pub fn get_connection(&self, priority: Priority) -> Arc<EnginePool> {
        let engines = self.engines.load();
        if priority.is_critical() {
            return Arc::clone(&engines[0]);
        }
        engines
            .iter()
            .filter(|e| !e.is_closed())
            .min_by_key(|e| e.checked_out())
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&engines[0]))
    }

    /// 选择引擎并借出连接
    pub async fn checkout(&self, priority: Priority, deadline: Instant) -> ShieldResult<PooledConnection> {
        let engine = self.get_connection(priority);
        debug!("为 {} 请求选择引擎 {}", priority, engine.id());
        engine.checkout(deadline).await
    }

    /// 所有引擎的聚合负载
    pub fn pool_stats(&self) -> PoolStats {
        self.engines.load().iter().fold(PoolStats::default(), |acc, e| PoolStats {
            size: acc.size + e.pool_size(),
            checked_out: acc.checked_out + e.checked_out(),
            overflow: acc.overflow + e.overflow(),
        })
    }

    /// 当前聚合利用率百分比
    pub fn utilization(&self) -> f64 {
        self.pool_stats().utilization()
    }

    /// 监控周期：采样、喂给预测器、扫描并回收泄漏连接
    pub fn collect_metrics(&self) -> MetricsSample {
        let sample = self.sampler.sample(self.pool_stats());
        self.predictor.record(sample.utilization);
        self.reclaim_leaks();
        sample
    }

    /// 扫描泄漏并强制回收，返回回收数量
    pub fn reclaim_leaks(&self) -> usize {
        let leaked = self.leak_detector.check_for_leaks();
        if leaked.is_empty() {
            return 0;
        }

        let engines = self.engines.load();
        let mut reclaimed = 0;
        for handle in leaked {
            match engines.iter().find(|e| e.id() == handle.engine_id) {
                Some(engine) if engine.reclaim(handle.connection_id) => reclaimed += 1,
                Some(_) => debug!("泄漏连接已归还: {}", handle),
                None => debug!("泄漏连接所属引擎已移除: {}", handle),
            }
        }
        reclaimed
    }

    /// 基于采样历史的扩缩容判断（不执行）
    pub fn evaluate_scaling(&self) -> ScalingDecision {
        scaling::evaluate(&self.sampler, &self.config, self.engine_count(), self.max_engines())
    }

    /// 自动扩缩容周期
    ///
    /// 扩容在已有在途操作时直接跳过；缩容等待在途操作完成后再执行
    pub async fn auto_scale(&self) -> ScalingDecision {
        let mut decision = self.evaluate_scaling();

        match decision.action {
            ScalingAction::ScaleUp => {
                let Ok(_guard) = self.scale_lock.try_lock() else {
                    debug!("已有扩缩容操作在途，跳过本次扩容");
                    return ScalingDecision::none(
                        "已有扩缩容操作在途",
                        decision.utilization,
                        decision.cpu,
                        decision.engine_count,
                    );
                };
                decision.applied = self.apply_scale_up().await.is_some();
            }
            ScalingAction::ScaleDown => {
                let _guard = self.scale_lock.lock().await;
                decision.applied = self.apply_scale_down();
            }
            ScalingAction::None => {}
        }

        if decision.action != ScalingAction::None {
            info!(
                "扩缩容决策: action={}, reason={}, applied={}, engines={}",
                decision.action,
                decision.reason,
                decision.applied,
                self.engine_count()
            );
        }
        decision
    }

    /// 立即扩容一个引擎，返回新引擎ID
    pub async fn scale_up(&self) -> Option<u32> {
        let _guard = self.scale_lock.lock().await;
        self.apply_scale_up().await
    }

    /// 立即缩容一个引擎
    pub async fn scale_down(&self) -> bool {
        let _guard = self.scale_lock.lock().await;
        self.apply_scale_down()
    }

    /// 调用方必须持有 scale_lock
    async fn apply_scale_up(&self) -> Option<u32> {
        match self.add_engine().await {
            Ok(id) => Some(id),
            Err(e) => {
                self.scaling_failures.fetch_add(1, Ordering::Relaxed);
                error!("扩容失败，维持当前引擎数 {}: {}", self.engine_count(), e);
                None
            }
        }
    }

    async fn add_engine(&self) -> ShieldResult<u32> {
        let current = self.engine_count();
        if current >= self.max_engines() {
            return Err(crate::shield_error!(
                scaling,
                format!("引擎数 {} 已达上限 {}", current, self.max_engines())
            ));
        }

        let id = self.next_engine_id.fetch_add(1, Ordering::SeqCst);
        let engine = EnginePool::create(
            id,
            self.driver.clone(),
            self.leak_detector.clone(),
            self.config.pool_size,
            self.config.max_overflow(),
        )
        .await
        .map_err(|e| crate::shield_error!(scaling, e))?;

        let mut engines = self.engines.load().as_ref().clone();
        engines.push(engine);
        let count = engines.len();
        self.engines.store(Arc::new(engines));
        self.scale_ups.fetch_add(1, Ordering::Relaxed);
        info!("扩容完成: 新引擎 {}，当前引擎数 {}", id, count);
        Ok(id)
    }

    /// 调用方必须持有 scale_lock
    fn apply_scale_down(&self) -> bool {
        let mut engines = self.engines.load().as_ref().clone();
        if engines.len() <= 1 {
            return false;
        }
        let Some(removed) = engines.pop() else {
            return false;
        };
        let count = engines.len();
        self.engines.store(Arc::new(engines));
        removed.close();
        self.scale_downs.fetch_add(1, Ordering::Relaxed);
        info!("缩容完成: 移除引擎 {}，当前引擎数 {}", removed.id(), count);
        true
    }

    /// 设置引擎数上限（运行模式切换时调用），超出的引擎立即移除
    pub async fn set_max_engines(&self, max_engines: usize) {
        let max_engines = max_engines.clamp(1, self.config.max_engines.max(1));
        self.max_engines.store(max_engines, Ordering::SeqCst);

        let _guard = self.scale_lock.lock().await;
        while self.engine_count() > max_engines {
            if !self.apply_scale_down() {
                break;
            }
        }
    }

    /// 调整每个引擎的常驻连接数
    pub fn resize_engines(&self, pool_size: u32) {
        let pool_size = pool_size.clamp(1, self.config.max_pool_size.max(1));
        for engine in self.engines.load().iter() {
            engine.resize(pool_size);
        }
    }

    /// 当前每个引擎的常驻连接数
    pub fn engine_pool_size(&self) -> u32 {
        self.primary().pool_size()
    }

    /// 关闭所有引擎的空闲连接（清理周期）
    pub fn drain_idle(&self) -> usize {
        self.engines.load().iter().map(|e| e.drain_idle()).sum()
    }

    pub fn health(&self) -> PoolHealth {
        let engines = self.engines.load();
        let stats = self.pool_stats();
        PoolHealth {
            engine_count: engines.len(),
            max_engines: self.max_engines(),
            utilization: stats.utilization(),
            checked_out: stats.checked_out,
            predicted_load: self.predictor.predict_next_load(),
            recovered_leaks: self.leak_detector.recovered_leaks(),
            tracked_checkouts: self.leak_detector.tracked(),
            scale_ups: self.scale_ups.load(Ordering::Relaxed),
            scale_downs: self.scale_downs.load(Ordering::Relaxed),
            scaling_failures: self.scaling_failures.load(Ordering::Relaxed),
            engines: engines.iter().map(|e| e.status()).collect(),
        }
    }

    /// 关闭全部引擎
    pub fn shutdown(&self) {
        for engine in self.engines.load().iter() {
            engine.close();
        }
        warn!("连接池管理器已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StaticProbe;
    use crate::pool::mock_driver::MockDriver;
    use tokio::time::Duration;

    async fn manager(config: PoolConfig) -> (ConnectionPoolManager, MockDriver) {
        let driver = MockDriver::new();
        let manager = ConnectionPoolManager::new(
            config,
            Arc::new(driver.clone()),
            Arc::new(StaticProbe::default()),
            1000,
        )
        .await
        .unwrap();
        (manager, driver)
    }

    fn small() -> PoolConfig {
        PoolConfig {
            pool_size: 2,
            max_pool_size: 4,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_critical_routes_to_primary_and_others_balance() {
        let (manager, _driver) = manager(small()).await;
        manager.scale_up().await.unwrap();
        assert_eq!(manager.engine_count(), 2);

        let deadline = Instant::now() + Duration::from_secs(1);
        let _a = manager.checkout(Priority::Normal, deadline).await.unwrap();
        let b = manager.checkout(Priority::Normal, deadline).await.unwrap();
        assert_ne!(_a.engine_id(), b.engine_id());

        let c = manager.checkout(Priority::Critical, deadline).await.unwrap();
        assert_eq!(c.engine_id(), 0);
    }

    #[tokio::test]
    async fn test_scale_up_respects_cap_and_failure_is_swallowed() {
        let (manager, driver) = manager(PoolConfig {
            max_engines: 2,
            ..small()
        })
        .await;
        assert!(manager.scale_up().await.is_some());
        assert!(manager.scale_up().await.is_none());
        assert_eq!(manager.engine_count(), 2);

        manager.scale_down().await;
        driver.state.fail_connect.store(true, Ordering::SeqCst);
        assert!(manager.scale_up().await.is_none());
        assert_eq!(manager.engine_count(), 1);
        assert_eq!(manager.health().scaling_failures, 2);
    }

    #[tokio::test]
    async fn test_auto_scale_up_from_samples() {
        let (manager, _driver) = manager(small()).await;
        manager.scale_up().await.unwrap();
        manager.scale_up().await.unwrap();
        for _ in 0..10 {
            manager.sampler().record(MetricsSample::synthetic(85.0, 20.0));
        }

        let decision = manager.auto_scale().await;
        assert_eq!(decision.action, ScalingAction::ScaleUp);
        assert!(decision.applied);
        assert!(decision.reason.contains("85.0%"));
        assert_eq!(manager.engine_count(), 4);
    }

    #[tokio::test]
    async fn test_scale_up_skipped_while_in_flight() {
        let (manager, _driver) = manager(small()).await;
        for _ in 0..10 {
            manager.sampler().record(MetricsSample::synthetic(95.0, 20.0));
        }

        let guard = manager.scale_lock.lock().await;
        let decision = manager.auto_scale().await;
        assert_eq!(decision.action, ScalingAction::None);
        assert_eq!(manager.engine_count(), 1);
        drop(guard);

        assert!(manager.auto_scale().await.applied);
        assert_eq!(manager.engine_count(), 2);
    }

    #[tokio::test]
    async fn test_auto_scale_down_keeps_primary() {
        let (manager, _driver) = manager(small()).await;
        manager.scale_up().await.unwrap();
        for _ in 0..20 {
            manager.sampler().record(MetricsSample::synthetic(5.0, 5.0));
        }
        let decision = manager.auto_scale().await;
        assert_eq!(decision.action, ScalingAction::ScaleDown);
        assert_eq!(manager.engine_count(), 1);

        let decision = manager.auto_scale().await;
        assert_eq!(decision.action, ScalingAction::None);
        assert_eq!(manager.primary().id(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_metrics_reclaims_leaks() {
        let (manager, _driver) = manager(small()).await;
        let leaked = manager
            .checkout(Priority::Normal, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap();

        let sample = manager.collect_metrics();
        assert_eq!(sample.checked_out, 1);
        assert_eq!(manager.predictor().sample_count(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        manager.collect_metrics();
        assert_eq!(manager.health().recovered_leaks, 1);
        assert_eq!(manager.pool_stats().checked_out, 0);
        drop(leaked);
        assert_eq!(manager.pool_stats().checked_out, 0);
    }

    #[tokio::test]
    async fn test_set_max_engines_trims_extra_engines() {
        let (manager, _driver) = manager(small()).await;
        manager.scale_up().await.unwrap();
        manager.scale_up().await.unwrap();
        manager.set_max_engines(1).await;
        assert_eq!(manager.engine_count(), 1);
        assert!(manager.scale_up().await.is_none());

        manager.set_max_engines(5).await;
        assert!(manager.scale_up().await.is_some());
    }
}
