//! # 主控制器
//!
//! 由应用启动流程显式创建与关闭的长生命周期对象。持有运行模式，
//! 驱动监控、优化、自动扩缩容与健康检查四个后台周期任务。
//!
//! 模式切换规则见 [`OperationMode`]：紧急模式只能由运维显式切回正常模式。

pub mod health;
pub mod loops;
pub mod optimizer;
pub mod status;

pub use health::{HealthInputs, HealthMonitor, HealthReport, HealthStatus};
pub use optimizer::{OptimizationReport, OptimizerInputs, Tuning};
pub use status::{ComprehensiveStatus, STATUS_SCHEMA_VERSION};

use crate::breaker::CircuitBreaker;
use crate::cache::QueryCache;
use crate::config::ShieldConfig;
use crate::error::ShieldResult;
use crate::facade::ResilienceFacade;
use crate::metrics::{HostProbe, SysinfoProbe};
use crate::pool::{ConnectionPoolManager, DatabaseDriver, ScalingDecision};
use crate::scheduler::QueryScheduler;
use crate::types::OperationMode;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rat_logger::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// 控制器共享状态，由后台任务与控制面操作共同使用
#[derive(Debug)]
pub(crate) struct ControllerCore {
    instance_id: String,
    config: ShieldConfig,
    facade: Arc<ResilienceFacade>,
    scheduler: Arc<QueryScheduler>,
    health: HealthMonitor,
    mode: RwLock<OperationMode>,
    /// 串行化模式切换
    mode_lock: tokio::sync::Mutex<()>,
    started_at: DateTime<Utc>,
    started: Instant,
    mode_changes: AtomicU64,
    optimizations: AtomicU64,
    optimizing: AtomicBool,
    last_scaling: Mutex<Option<ScalingDecision>>,
}

impl ControllerCore {
    fn mode(&self) -> OperationMode {
        *self.mode.read()
    }

    fn health_inputs(&self) -> HealthInputs {
        let pool = self.facade.pool();
        let (error_rate, outcomes) = self.facade.stats().recent_error_rate();
        let cache = self.facade.cache().stats();
        let latest = pool.sampler().latest();

        HealthInputs {
            utilization: pool.utilization(),
            error_rate,
            outcomes,
            open_circuits: self.facade.breaker().open_circuits(),
            cpu_percent: latest.as_ref().map(|s| s.cpu_percent).unwrap_or(0.0),
            memory_percent: latest.as_ref().map(|s| s.memory_percent).unwrap_or(0.0),
            cache_hit_rate: cache.hit_rate,
            cache_lookups: cache.hits + cache.misses,
        }
    }

    async fn set_mode(&self, target: OperationMode, reason: &str) -> ShieldResult<bool> {
        let _guard = self.mode_lock.lock().await;
        let current = self.mode();
        if current == target {
            return Ok(false);
        }
        if !current.can_transition_to(target) {
            return Err(crate::shield_error!(mode_transition, current, target));
        }

        *self.mode.write() = target;
        self.mode_changes.fetch_add(1, Ordering::Relaxed);

        let profile = target.profile();
        self.facade.pool().set_max_engines(profile.max_engines).await;
        let concurrency = self.scheduler.apply_profile(&profile);
        self.facade.set_shedding(profile.shed_low_priority);

        if target == OperationMode::Emergency {
            warn!(
                "进入紧急模式: {} -> {}，原因: {}，调度并发={}",
                current, target, reason, concurrency
            );
            self.facade.cleanup();
        } else {
            info!(
                "运行模式切换: {} -> {}，原因: {}，调度并发={}",
                current, target, reason, concurrency
            );
        }
        Ok(true)
    }

    /// 执行一次优化，已有优化在途时返回 None
    fn run_optimization(&self, force: bool) -> Option<OptimizationReport> {
        if self.optimizing.swap(true, Ordering::SeqCst) {
            debug!("已有优化在途，跳过");
            return None;
        }

        let pool = self.facade.pool();
        let inputs = OptimizerInputs {
            health: self.health_inputs(),
            predicted_load: pool.predictor().predict_next_load(),
            pool_size: pool.engine_pool_size(),
            max_pool_size: pool.config().max_pool_size,
        };
        let actions = optimizer::recommend(&inputs, self.health.thresholds());

        let mut report = OptimizationReport::default();
        for action in actions {
            let detail = match action {
                Tuning::ReduceConcurrency => {
                    let current = self.scheduler.concurrency();
                    let target = self.scheduler.scale_concurrency(current - current / 4);
                    format!("调度并发 {} -> {}", current, target)
                }
                Tuning::ShrinkPool => {
                    let target = optimizer::shrunk_pool_size(inputs.pool_size);
                    pool.resize_engines(target);
                    format!("常驻连接数 {} -> {}", inputs.pool_size, target)
                }
                Tuning::GrowPool => {
                    let target = optimizer::grown_pool_size(inputs.pool_size, inputs.max_pool_size);
                    pool.resize_engines(target);
                    format!("常驻连接数 {} -> {}", inputs.pool_size, target)
                }
                Tuning::SweepCache => {
                    format!("清理过期缓存 {} 条", self.facade.cache().sweep())
                }
            };
            report.actions.push(action);
            report.details.push(detail);
        }

        if force {
            let cleanup = self.facade.cleanup();
            report.details.push(format!(
                "清理: 过期缓存={}, 回收泄漏连接={}, 关闭空闲连接={}",
                cleanup.expired_entries, cleanup.reclaimed_leaks, cleanup.closed_idle
            ));
        }

        self.optimizations.fetch_add(1, Ordering::Relaxed);
        self.optimizing.store(false, Ordering::SeqCst);
        if !report.actions.is_empty() {
            info!("优化完成: {}", report.details.join("; "));
        }
        Some(report)
    }

    async fn check_health(&self) -> ShieldResult<HealthReport> {
        let report = self.health.evaluate(&self.health_inputs());
        debug!("健康检查: score={:.1}, status={:?}", report.score, report.status);

        if report.emergency && self.mode() != OperationMode::Emergency {
            let reason = format!(
                "健康分 {:.1}，错误率 {:.1}%",
                report.score,
                report.error_rate * 100.0
            );
            self.set_mode(OperationMode::Emergency, &reason).await?;
        }
        Ok(report)
    }
}

/// 主控制器
#[derive(Debug)]
pub struct MasterController {
    core: Arc<ControllerCore>,
    tasks: tokio::sync::RwLock<Vec<JoinHandle<()>>>,
}

impl MasterController {
    /// 创建控制器，使用系统资源探测器
    pub async fn new(config: ShieldConfig, driver: Arc<dyn DatabaseDriver>) -> ShieldResult<Self> {
        Self::with_probe(config, driver, Arc::new(SysinfoProbe::new())).await
    }

    /// 使用 sqlx 驱动连接 `database_url`
    #[cfg(any(feature = "sqlite-support", feature = "postgres-support", feature = "mysql-support"))]
    pub async fn connect(config: ShieldConfig) -> ShieldResult<Self> {
        let driver = Arc::new(crate::pool::SqlxAnyDriver::new(config.database_url.clone()));
        Self::new(config, driver).await
    }

    /// 创建控制器并指定主机资源探测器
    pub async fn with_probe(
        config: ShieldConfig,
        driver: Arc<dyn DatabaseDriver>,
        probe: Arc<dyn HostProbe>,
    ) -> ShieldResult<Self> {
        config.validate()?;

        let pool = ConnectionPoolManager::new(
            config.pool.clone(),
            driver,
            probe,
            config.monitor.history_capacity,
        )
        .await?;
        let scheduler = Arc::new(QueryScheduler::new(config.scheduler.clone()));
        let facade = ResilienceFacade::new(
            Arc::new(pool),
            Arc::new(CircuitBreaker::new(config.breaker.clone())),
            Arc::new(QueryCache::new(config.cache.clone())),
        )
        .with_scheduler(scheduler.clone());

        let instance_id = uuid::Uuid::new_v4().to_string();
        info!("主控制器初始化完成: instance={}, 运行模式={}", instance_id, OperationMode::Normal);

        Ok(Self {
            core: Arc::new(ControllerCore {
                instance_id,
                health: HealthMonitor::new(config.thresholds.clone()),
                config,
                facade: Arc::new(facade),
                scheduler,
                mode: RwLock::new(OperationMode::Normal),
                mode_lock: tokio::sync::Mutex::new(()),
                started_at: Utc::now(),
                started: Instant::now(),
                mode_changes: AtomicU64::new(0),
                optimizations: AtomicU64::new(0),
                optimizing: AtomicBool::new(false),
                last_scaling: Mutex::new(None),
            }),
            tasks: tokio::sync::RwLock::new(Vec::new()),
        })
    }

    pub fn facade(&self) -> &Arc<ResilienceFacade> {
        &self.core.facade
    }

    pub fn scheduler(&self) -> &Arc<QueryScheduler> {
        &self.core.scheduler
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.core.config
    }

    pub fn mode(&self) -> OperationMode {
        self.core.mode()
    }

    /// 控制器实例ID，出现在状态文档中
    pub fn instance_id(&self) -> &str {
        &self.core.instance_id
    }

    pub async fn is_running(&self) -> bool {
        !self.tasks.read().await.is_empty()
    }

    /// 启动后台任务，重复调用无副作用
    pub async fn start(&self) {
        let mut tasks = self.tasks.write().await;
        if !tasks.is_empty() {
            return;
        }

        let monitor = &self.core.config.monitor;
        tasks.push(loops::spawn_loop(
            "monitor",
            Duration::from_secs(monitor.sample_interval_secs),
            self.core.clone(),
            |core| core.monitor_tick(),
        ));
        tasks.push(loops::spawn_loop(
            "optimizer",
            Duration::from_secs(monitor.optimizer_interval_secs),
            self.core.clone(),
            |core| core.optimizer_tick(),
        ));
        tasks.push(loops::spawn_loop(
            "autoscaler",
            Duration::from_secs(monitor.autoscale_interval_secs),
            self.core.clone(),
            |core| core.autoscale_tick(),
        ));
        tasks.push(loops::spawn_loop(
            "health",
            Duration::from_secs(monitor.health_interval_secs),
            self.core.clone(),
            |core| core.health_tick(),
        ));
        info!("主控制器已启动 {} 个后台任务", tasks.len());
    }

    /// 停止后台任务并关闭连接池
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.write().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        self.core.facade.pool().shutdown();
        info!("主控制器已关闭");
    }

    /// 切换运行模式
    pub async fn set_operation_mode(&self, mode: OperationMode) -> ShieldResult<()> {
        self.core.set_mode(mode, "运维指令").await.map(|_| ())
    }

    /// 立即执行一次优化与清理，已有优化在途时返回 false
    pub fn force_optimization(&self) -> bool {
        self.core.run_optimization(true).is_some()
    }

    /// 立即执行一次健康检查
    pub async fn health_check(&self) -> ShieldResult<HealthReport> {
        self.core.check_health().await
    }

    pub fn get_comprehensive_status(&self) -> ComprehensiveStatus {
        let core = &self.core;
        let facade = &core.facade;
        let circuits = facade.breaker().snapshots();
        let open_circuits = facade.breaker().open_circuits();

        ComprehensiveStatus {
            schema_version: STATUS_SCHEMA_VERSION,
            instance_id: core.instance_id.clone(),
            mode: core.mode(),
            running: self.tasks.try_read().map(|t| !t.is_empty()).unwrap_or(true),
            started_at: core.started_at,
            uptime_secs: core.started.elapsed().as_secs(),
            generated_at: Utc::now(),
            mode_changes: core.mode_changes.load(Ordering::Relaxed),
            optimizations: core.optimizations.load(Ordering::Relaxed),
            operations: facade.stats().snapshot(),
            pool: facade.pool().health(),
            circuits,
            open_circuits,
            cache: facade.cache().stats(),
            scheduler: core.scheduler.stats(),
            health: core.health.last_report(),
            last_scaling: core.last_scaling.lock().clone(),
        }
    }
}

impl Drop for MasterController {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_write() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
