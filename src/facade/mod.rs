//! # 弹性门面
//!
//! 应用访问数据库的唯一入口：准入检查（熔断器）→ 缓存与查询改写 → 连接池借出 → 执行，
//! 执行结果回写熔断器、缓存与统计。

pub mod operations;
pub mod session;
pub mod stats;

pub use operations::CleanupReport;
pub use session::Session;
pub use stats::{OperationStats, OperationStatsSnapshot};

use crate::breaker::CircuitBreaker;
use crate::cache::QueryCache;
use crate::pool::ConnectionPoolManager;
use crate::scheduler::QueryScheduler;
use crate::types::Priority;
use rat_logger::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 弹性门面
#[derive(Debug)]
pub struct ResilienceFacade {
    pool: Arc<ConnectionPoolManager>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<QueryCache>,
    scheduler: Option<Arc<QueryScheduler>>,
    stats: Arc<OperationStats>,
    /// 紧急模式下削减低优先级请求
    shed_low_priority: AtomicBool,
}

impl ResilienceFacade {
    pub fn new(pool: Arc<ConnectionPoolManager>, breaker: Arc<CircuitBreaker>, cache: Arc<QueryCache>) -> Self {
        Self {
            pool,
            breaker,
            cache,
            scheduler: None,
            stats: Arc::new(OperationStats::new()),
            shed_low_priority: AtomicBool::new(false),
        }
    }

    /// 挂接查询调度器，批量执行与异步查询经由调度器控制并发
    pub fn with_scheduler(mut self, scheduler: Arc<QueryScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPoolManager> {
        &self.pool
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> Option<&Arc<QueryScheduler>> {
        self.scheduler.as_ref()
    }

    pub fn stats(&self) -> &Arc<OperationStats> {
        &self.stats
    }

    pub fn set_shedding(&self, enabled: bool) {
        if self.shed_low_priority.swap(enabled, Ordering::SeqCst) != enabled {
            info!("低优先级请求削减: {}", if enabled { "开启" } else { "关闭" });
        }
    }

    pub fn is_shedding(&self) -> bool {
        self.shed_low_priority.load(Ordering::SeqCst)
    }

    fn sheds(&self, priority: Priority) -> bool {
        priority == Priority::Low && self.is_shedding()
    }
}
