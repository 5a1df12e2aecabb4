//! 门面对外操作：会话、查询、异步查询、批量执行与清理

use super::ResilienceFacade;
use super::session::Session;
use crate::breaker::{Admission, endpoint_name};
use crate::cache::OptimizedQuery;
use crate::error::{ShieldError, ShieldResult};
use crate::types::{Priority, QueryOutcome, QueryParams};
use futures::future::BoxFuture;
use rat_logger::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, timeout_at};

/// 清理结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub expired_entries: usize,
    pub reclaimed_leaks: usize,
    pub closed_idle: usize,
}

/// 在截止时间内完成，超时返回 `Timeout`
async fn bounded<T, F>(deadline: Instant, timeout: Duration, fut: F) -> ShieldResult<T>
where
    F: Future<Output = ShieldResult<T>>,
{
    timeout_at(deadline, fut)
        .await
        .map_err(|_| crate::shield_error!(timeout, timeout.as_millis() as u64))?
}

impl ResilienceFacade {
    fn shed(&self, endpoint: &str) -> ShieldError {
        self.stats.record_rejected();
        debug!("紧急模式削减低优先级请求: endpoint={}", endpoint);
        crate::shield_error!(unavailable, endpoint)
    }

    fn admit(&self, endpoint: &str) -> ShieldResult<Admission> {
        self.breaker.admit(endpoint).inspect_err(|_| {
            self.stats.record_rejected();
            debug!("熔断器拒绝请求: endpoint={}", endpoint);
        })
    }

    fn fail(&self, admission: Admission, error: ShieldError) -> ShieldError {
        warn!(
            "请求失败: endpoint={}, kind={}, error={}",
            admission.endpoint(),
            error.kind(),
            error
        );
        admission.failure();
        self.stats.record_failure(&error);
        error
    }

    /// 获取作用域会话，事务已开启
    ///
    /// 熔断器打开时立即返回 `Unavailable`，不会触碰连接池
    pub async fn get_session(&self, priority: Priority, timeout: Duration) -> ShieldResult<Session> {
        let endpoint = endpoint_name("session", priority);
        if self.sheds(priority) {
            return Err(self.shed(&endpoint));
        }
        let admission = self.admit(&endpoint)?;

        let deadline = Instant::now() + timeout;
        let mut conn = match self.pool.checkout(priority, deadline).await {
            Ok(conn) => conn,
            Err(e) => return Err(self.fail(admission, e)),
        };
        if let Err(e) = bounded(deadline, timeout, conn.begin()).await {
            conn.mark_broken();
            return Err(self.fail(admission, e));
        }

        self.stats.record_session();
        Ok(Session::new(
            conn,
            admission,
            timeout,
            self.cache.clone(),
            self.stats.clone(),
        ))
    }

    /// 在会话内运行闭包：成功提交，失败回滚并返回原错误
    pub async fn run_in_session<T, F>(&self, priority: Priority, timeout: Duration, f: F) -> ShieldResult<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, ShieldResult<T>>,
    {
        let mut session = self.get_session(priority, timeout).await?;
        match f(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(e) => {
                session.mark_failed();
                if let Err(rollback_error) = session.rollback().await {
                    warn!("会话回滚失败: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    /// 执行查询
    ///
    /// 读语句可命中缓存；写语句跳过缓存，成功后使相关表的缓存失效。
    /// 熔断器打开返回 `Unavailable`，超时返回 `Timeout`，数据库拒绝返回 `ExecutionError`。
    pub async fn execute_query(
        &self,
        query: &str,
        params: &[JsonValue],
        priority: Priority,
        use_cache: bool,
        timeout: Duration,
    ) -> ShieldResult<QueryOutcome> {
        let endpoint = endpoint_name("query", priority);
        if self.sheds(priority) {
            return Err(self.shed(&endpoint));
        }
        let admission = self.admit(&endpoint)?;

        // 缓存应答不代表后端健康，只归还名额
        let optimized = self.cache.optimize(query, params, use_cache);
        if let Some(cached) = optimized.cached.clone() {
            admission.release();
            self.stats.record_cache_hit();
            return Ok(cached);
        }

        let started = Instant::now();
        match self.run_on_pool(&optimized, priority, started + timeout, timeout).await {
            Ok(outcome) => {
                let elapsed = started.elapsed();
                admission.success();
                self.stats.record_success(elapsed);
                if optimized.kind.is_mutating() {
                    let invalidated = self.cache.invalidate_for_write(&optimized.query);
                    if invalidated > 0 {
                        debug!("写语句使 {} 条缓存失效", invalidated);
                    }
                } else if use_cache {
                    self.cache
                        .cache_result(&optimized.query, &optimized.params, &outcome, elapsed);
                }
                Ok(outcome)
            }
            Err(e) => Err(self.fail(admission, e)),
        }
    }

    async fn run_on_pool(
        &self,
        optimized: &OptimizedQuery,
        priority: Priority,
        deadline: Instant,
        timeout: Duration,
    ) -> ShieldResult<QueryOutcome> {
        let mut conn = self.pool.checkout(priority, deadline).await?;
        let result = bounded(deadline, timeout, conn.execute(&optimized.query, &optimized.params)).await;
        if matches!(result, Err(ShieldError::Timeout { .. })) {
            conn.mark_broken();
        }
        result
    }

    /// 在后台任务中执行查询，调用方等待返回的句柄
    ///
    /// 挂接调度器时受调度器并发上限约束
    pub fn execute_async_query(
        self: &Arc<Self>,
        query: impl Into<String>,
        params: QueryParams,
        priority: Priority,
        use_cache: bool,
        timeout: Duration,
    ) -> JoinHandle<ShieldResult<QueryOutcome>> {
        let facade = Arc::clone(self);
        let query = query.into();
        tokio::spawn(async move {
            let run = facade.execute_query(&query, &params, priority, use_cache, timeout);
            match facade.scheduler.clone() {
                Some(scheduler) => scheduler.schedule(priority, run).await.and_then(|result| result),
                None => run.await,
            }
        })
    }

    /// 批量执行
    ///
    /// 挂接调度器时按批大小分组，每组在同一连接的事务内执行，组间间隔由运行模式决定；
    /// 否则逐条执行。任一操作失败即中止剩余操作并返回该错误（已提交的分组不回退）。
    pub async fn bulk_execute(
        &self,
        operations: Vec<(String, QueryParams)>,
        priority: Priority,
    ) -> ShieldResult<Vec<QueryOutcome>> {
        let timeout = self.pool.config().connection_timeout();
        let Some(scheduler) = self.scheduler.clone() else {
            let mut results = Vec::with_capacity(operations.len());
            for (query, params) in &operations {
                results.push(self.execute_query(query, params, priority, false, timeout).await?);
            }
            return Ok(results);
        };

        let endpoint = endpoint_name("bulk", priority);
        if self.sheds(priority) {
            return Err(self.shed(&endpoint));
        }

        let batch_size = scheduler.batch_size();
        let total_batches = operations.len().div_ceil(batch_size);
        let mut results = Vec::with_capacity(operations.len());

        for (index, chunk) in operations.chunks(batch_size).enumerate() {
            if index > 0 {
                let window = scheduler.batch_window_ms();
                if window > 0 {
                    sleep(Duration::from_millis(window)).await;
                }
            }

            let admission = self.admit(&endpoint)?;
            let started = Instant::now();
            let outcome = scheduler
                .schedule(priority, self.run_batch(chunk, priority, started + timeout, timeout))
                .await
                .and_then(|result| result);

            match outcome {
                Ok(batch) => {
                    admission.success();
                    self.stats.record_success(started.elapsed());
                    self.stats.record_bulk_batch();
                    for (query, _) in chunk {
                        self.cache.invalidate_for_write(query);
                    }
                    results.extend(batch);
                }
                Err(e) => {
                    warn!(
                        "批量执行第 {}/{} 组失败，中止剩余操作",
                        index + 1,
                        total_batches
                    );
                    return Err(self.fail(admission, e));
                }
            }
        }

        info!("批量执行完成: 操作数={}, 分组数={}", results.len(), total_batches);
        Ok(results)
    }

    async fn run_batch(
        &self,
        chunk: &[(String, QueryParams)],
        priority: Priority,
        deadline: Instant,
        timeout: Duration,
    ) -> ShieldResult<Vec<QueryOutcome>> {
        let mut conn = self.pool.checkout(priority, deadline).await?;

        let result = async {
            bounded(deadline, timeout, conn.begin()).await?;
            let mut outcomes = Vec::with_capacity(chunk.len());
            for (query, params) in chunk {
                outcomes.push(bounded(deadline, timeout, conn.execute(query, params)).await?);
            }
            bounded(deadline, timeout, conn.commit()).await?;
            Ok(outcomes)
        }
        .await;

        match result {
            Ok(outcomes) => Ok(outcomes),
            Err(e) => {
                if matches!(e, ShieldError::Timeout { .. }) || conn.rollback().await.is_err() {
                    conn.mark_broken();
                }
                Err(e)
            }
        }
    }

    /// 清理过期缓存、回收泄漏连接并关闭空闲连接
    pub fn cleanup(&self) -> CleanupReport {
        let report = CleanupReport {
            expired_entries: self.cache.sweep(),
            reclaimed_leaks: self.pool.reclaim_leaks(),
            closed_idle: self.pool.drain_idle(),
        };
        info!(
            "清理完成: 过期缓存={}, 回收泄漏连接={}, 关闭空闲连接={}",
            report.expired_entries, report.reclaimed_leaks, report.closed_idle
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreaker, CircuitState};
    use crate::cache::QueryCache;
    use crate::config::{BreakerConfig, PoolConfig, QueryCacheConfig, SchedulerConfig};
    use crate::metrics::StaticProbe;
    use crate::pool::ConnectionPoolManager;
    use crate::pool::mock_driver::MockDriver;
    use crate::scheduler::QueryScheduler;
    use std::sync::atomic::Ordering;

    const TIMEOUT: Duration = Duration::from_secs(1);

    async fn facade(driver: &MockDriver) -> ResilienceFacade {
        let pool = ConnectionPoolManager::new(
            PoolConfig {
                pool_size: 2,
                max_pool_size: 4,
                ..PoolConfig::default()
            },
            Arc::new(driver.clone()),
            Arc::new(StaticProbe::default()),
            100,
        )
        .await
        .unwrap();
        ResilienceFacade::new(
            Arc::new(pool),
            Arc::new(CircuitBreaker::new(BreakerConfig::default())),
            Arc::new(QueryCache::new(QueryCacheConfig::default())),
        )
    }

    fn scheduler(batch_size: usize) -> Arc<QueryScheduler> {
        Arc::new(QueryScheduler::new(SchedulerConfig {
            batch_size,
            ..SchedulerConfig::default()
        }))
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_touching_pool() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;
        driver.state.fail_queries.store(true, Ordering::SeqCst);

        for _ in 0..5 {
            let err = facade
                .execute_query("SELECT 1", &[], Priority::Normal, false, TIMEOUT)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "execution_error");
        }
        assert_eq!(facade.breaker().state("query@normal"), CircuitState::Open);

        let err = facade
            .execute_query("SELECT 1", &[], Priority::Normal, false, TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(driver.state.executed().len(), 5);
        assert_eq!(facade.stats().snapshot().rejected, 1);

        // 其他优先级是独立端点
        assert_eq!(facade.breaker().state("query@high"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unbounded_select_gets_safety_limit() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;
        facade
            .execute_query("SELECT * FROM logs", &[], Priority::Normal, true, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(driver.state.executed(), vec!["SELECT * FROM logs LIMIT 1000".to_string()]);
    }

    #[tokio::test]
    async fn test_cache_hit_and_write_invalidation() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;
        let select = "SELECT id FROM users WHERE id = ?";
        let params = vec![serde_json::json!(1)];

        let first = facade
            .execute_query(select, &params, Priority::Normal, true, TIMEOUT)
            .await
            .unwrap();
        let second = facade
            .execute_query(select, &params, Priority::Normal, true, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(driver.state.executed().len(), 1);
        assert_eq!(facade.stats().snapshot().cache_hits, 1);

        let affected = facade
            .execute_query("UPDATE users SET name = ? WHERE id = ?", &params, Priority::Normal, true, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(affected.row_count(), 1);

        facade
            .execute_query(select, &params, Priority::Normal, true, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(driver.state.executed().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_times_out_and_counts_as_failure() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;
        driver.state.delay_ms.store(500, Ordering::SeqCst);

        let err = facade
            .execute_query("SELECT 1", &[], Priority::High, false, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");

        let snapshot = facade.breaker().snapshot("query@high").unwrap();
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(facade.stats().snapshot().timeouts, 1);
        assert_eq!(facade.pool().pool_stats().checked_out, 0);
    }

    #[tokio::test]
    async fn test_shedding_rejects_low_priority_only() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;
        facade.set_shedding(true);

        let err = facade
            .execute_query("SELECT 1", &[], Priority::Low, false, TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(facade.get_session(Priority::Low, TIMEOUT).await.is_err());
        assert!(
            facade
                .execute_query("SELECT 1", &[], Priority::Normal, false, TIMEOUT)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_run_in_session_commits_or_rolls_back() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;

        let count = facade
            .run_in_session(Priority::Normal, TIMEOUT, |session| {
                Box::pin(async move {
                    session
                        .execute("INSERT INTO users (name) VALUES (?)", &[serde_json::json!("a")])
                        .await
                        .map(|outcome| outcome.row_count())
                })
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(driver.state.commits.load(Ordering::SeqCst), 1);

        let result: ShieldResult<()> = facade
            .run_in_session(Priority::Normal, TIMEOUT, |_session| {
                Box::pin(async move { Err(crate::shield_error!(execution, "业务校验失败")) })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(driver.state.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(facade.breaker().snapshot("session@normal").unwrap().failure_count, 1);
        assert_eq!(facade.pool().pool_stats().checked_out, 0);
    }

    #[tokio::test]
    async fn test_dropped_session_rolls_back_in_background() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;

        let session = facade.get_session(Priority::Normal, TIMEOUT).await.unwrap();
        assert_eq!(driver.state.begins.load(Ordering::SeqCst), 1);
        drop(session);

        for _ in 0..10 {
            if driver.state.rollbacks.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(driver.state.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(facade.pool().pool_stats().checked_out, 0);
    }

    /// 打开端点并等到恢复超时过后
    async fn open_until_half_open(facade: &ResilienceFacade, endpoint: &str) {
        for _ in 0..5 {
            facade.breaker().record_failure(endpoint);
        }
        assert_eq!(facade.breaker().state(endpoint), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(34)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hits_do_not_close_half_open_breaker() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;
        let select = "SELECT id FROM users WHERE id = 7";
        facade
            .execute_query(select, &[], Priority::Normal, true, TIMEOUT)
            .await
            .unwrap();

        open_until_half_open(&facade, "query@normal").await;
        for _ in 0..5 {
            facade
                .execute_query(select, &[], Priority::Normal, true, TIMEOUT)
                .await
                .unwrap();
        }

        assert_eq!(driver.state.executed().len(), 1);
        assert_eq!(facade.stats().snapshot().cache_hits, 5);
        let snapshot = facade.breaker().snapshot("query@normal").unwrap();
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert_eq!(snapshot.half_open_successes, 0);
        assert_eq!(snapshot.half_open_in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_queries_return_half_open_slots() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;
        open_until_half_open(&facade, "query@normal").await;

        driver.state.delay_ms.store(500, Ordering::SeqCst);
        for _ in 0..3 {
            let cancelled = tokio::time::timeout(
                Duration::from_millis(50),
                facade.execute_query("SELECT 2", &[], Priority::Normal, false, TIMEOUT),
            )
            .await;
            assert!(cancelled.is_err());
        }
        assert_eq!(facade.breaker().snapshot("query@normal").unwrap().half_open_in_flight, 0);

        driver.state.delay_ms.store(0, Ordering::SeqCst);
        let outcome = facade
            .execute_query("SELECT 2", &[], Priority::Normal, false, TIMEOUT)
            .await
            .unwrap();
        assert!(outcome.is_rows());
        let snapshot = facade.breaker().snapshot("query@normal").unwrap();
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert_eq!(snapshot.half_open_successes, 1);
        assert_eq!(facade.pool().pool_stats().checked_out, 0);
    }

    #[tokio::test]
    async fn test_bulk_execute_batches_in_transactions() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await.with_scheduler(scheduler(2));

        let operations = (0..5)
            .map(|i| ("INSERT INTO events (id) VALUES (?)".to_string(), vec![serde_json::json!(i)]))
            .collect();
        let results = facade.bulk_execute(operations, Priority::Normal).await.unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(driver.state.begins.load(Ordering::SeqCst), 3);
        assert_eq!(driver.state.commits.load(Ordering::SeqCst), 3);
        assert_eq!(facade.stats().snapshot().bulk_batches, 3);
    }

    #[tokio::test]
    async fn test_bulk_execute_first_failure_aborts() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await.with_scheduler(scheduler(2));
        driver.state.fail_queries.store(true, Ordering::SeqCst);

        let operations = (0..6)
            .map(|i| ("DELETE FROM events WHERE id = ?".to_string(), vec![serde_json::json!(i)]))
            .collect();
        assert!(facade.bulk_execute(operations, Priority::Normal).await.is_err());
        assert_eq!(driver.state.begins.load(Ordering::SeqCst), 1);
        assert_eq!(driver.state.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(driver.state.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_execute_without_scheduler_is_sequential() {
        let driver = MockDriver::new();
        let facade = facade(&driver).await;
        let operations = vec![
            ("INSERT INTO events (id) VALUES (1)".to_string(), vec![]),
            ("INSERT INTO events (id) VALUES (2)".to_string(), vec![]),
        ];
        let results = facade.bulk_execute(operations, Priority::Normal).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(driver.state.begins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_async_query_through_scheduler() {
        let driver = MockDriver::new();
        let facade = Arc::new(facade(&driver).await.with_scheduler(scheduler(10)));
        let handle = facade.execute_async_query("SELECT 1", vec![], Priority::Normal, false, TIMEOUT);
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.rows().len(), 1);
        assert_eq!(facade.scheduler().unwrap().stats().scheduled, 1);
    }
}
