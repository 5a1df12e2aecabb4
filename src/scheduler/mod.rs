//! # 查询调度器
//!
//! 以可调整的并发上限控制同时执行的查询数量。关键优先级请求绕过上限直接执行，
//! 并发上限由运行模式与自动扩缩容周期调整，批量执行的分组大小和分组间隔也由这里提供。

use crate::config::SchedulerConfig;
use crate::error::ShieldResult;
use crate::types::{ModeProfile, Priority};
use rat_logger::{debug, info};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};

/// 调度器状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub concurrency: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub running: usize,
    pub scheduled: u64,
    /// 绕过并发上限的关键请求数
    pub bypassed: u64,
    pub batch_size: usize,
    pub batch_window_ms: u64,
}

/// 查询调度器
#[derive(Debug)]
pub struct QueryScheduler {
    config: SchedulerConfig,
    slots: Semaphore,
    limit: AtomicUsize,
    /// 当前运行模式允许的并发上限
    ceiling: AtomicUsize,
    /// 下调上限时尚未收回的名额
    debt: AtomicUsize,
    batch_window_ms: AtomicU64,
    running: AtomicUsize,
    scheduled: AtomicU64,
    bypassed: AtomicU64,
}

/// 并发名额守卫，释放时优先抵扣欠下的名额
struct SlotGuard<'a> {
    scheduler: &'a QueryScheduler,
    permit: Option<SemaphorePermit<'a>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(permit) = self.permit.take() {
            if self.scheduler.take_debt(1) == 1 {
                permit.forget();
            }
        }
    }
}

impl QueryScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let limit = config
            .base_concurrency
            .clamp(config.min_concurrency.max(1), config.max_concurrency.max(1));
        Self {
            slots: Semaphore::new(limit),
            limit: AtomicUsize::new(limit),
            ceiling: AtomicUsize::new(config.max_concurrency.max(1)),
            debt: AtomicUsize::new(0),
            batch_window_ms: AtomicU64::new(0),
            running: AtomicUsize::new(0),
            scheduled: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
            config,
        }
    }

    /// 在并发上限内执行 future，关键请求不受上限约束
    pub async fn schedule<F, T>(&self, priority: Priority, fut: F) -> ShieldResult<T>
    where
        F: Future<Output = T>,
    {
        self.scheduled.fetch_add(1, Ordering::Relaxed);

        let permit = if priority.is_critical() {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            None
        } else {
            let permit = self
                .slots
                .acquire()
                .await
                .map_err(|_| crate::shield_error!(unavailable, "scheduler"))?;
            Some(permit)
        };

        self.running.fetch_add(1, Ordering::SeqCst);
        let _guard = SlotGuard {
            scheduler: self,
            permit,
        };
        Ok(fut.await)
    }

    /// 当前并发上限
    pub fn concurrency(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    /// 调整并发上限，结果限制在 [min, max] 内，返回调整后的值
    pub fn set_concurrency(&self, target: usize) -> usize {
        let target = target.clamp(
            self.config.min_concurrency.max(1),
            self.config.max_concurrency.max(1),
        );
        let old = self.limit.swap(target, Ordering::SeqCst);

        if target > old {
            let grow = target - old;
            let paid = self.take_debt(grow);
            self.slots.add_permits(grow - paid);
        } else if target < old {
            for _ in 0..(old - target) {
                match self.slots.try_acquire() {
                    Ok(permit) => permit.forget(),
                    Err(_) => {
                        self.debt.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }

        if target != old {
            info!("调度器并发上限调整: {} -> {}", old, target);
        }
        target
    }

    /// 按负载调整并发上限，不超过当前运行模式的上限
    pub fn scale_concurrency(&self, target: usize) -> usize {
        self.set_concurrency(target.min(self.ceiling()))
    }

    /// 当前运行模式允许的并发上限
    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::SeqCst)
    }

    /// 按运行模式调整并发上限与批处理间隔
    ///
    /// 并发系数小于 1 的模式同时把该值设为负载调整的上限
    pub fn apply_profile(&self, profile: &ModeProfile) -> usize {
        let target = (self.config.base_concurrency as f64 * profile.concurrency_factor).round() as usize;
        let ceiling = if profile.concurrency_factor < 1.0 {
            target
        } else {
            self.config.max_concurrency
        };
        self.ceiling.store(ceiling.max(1), Ordering::SeqCst);
        self.batch_window_ms.store(profile.batch_window_ms, Ordering::SeqCst);
        debug!(
            "应用调度参数: 并发系数={}, 批处理间隔={}ms",
            profile.concurrency_factor, profile.batch_window_ms
        );
        self.set_concurrency(target)
    }

    /// 批量执行时每组的操作数
    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// 批处理分组之间的间隔（毫秒）
    pub fn batch_window_ms(&self) -> u64 {
        self.batch_window_ms.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            concurrency: self.concurrency(),
            min_concurrency: self.config.min_concurrency,
            max_concurrency: self.config.max_concurrency,
            running: self.running(),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            batch_size: self.batch_size(),
            batch_window_ms: self.batch_window_ms(),
        }
    }

    /// 抵扣至多 n 个欠下的名额，返回实际抵扣数
    fn take_debt(&self, n: usize) -> usize {
        let mut debt = self.debt.load(Ordering::SeqCst);
        loop {
            if debt == 0 {
                return 0;
            }
            let paid = debt.min(n);
            match self
                .debt
                .compare_exchange(debt, debt - paid, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return paid,
                Err(current) => debt = current,
            }
        }
    }
}
