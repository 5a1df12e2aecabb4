//! 作用域会话
//!
//! 会话在获取时开启事务；`commit` 提交、`rollback` 回滚，两者都消费会话。
//! 未显式结束就被释放的会话会在后台回滚，并按失败计入熔断器。

use super::stats::OperationStats;
use crate::breaker::Admission;
use crate::cache::QueryCache;
use crate::error::ShieldResult;
use crate::pool::PooledConnection;
use crate::types::{QueryOutcome, StatementKind};
use rat_logger::{debug, warn};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::time::{Duration, Instant, timeout_at};

/// 会话结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

/// 作用域数据库会话
pub struct Session {
    conn: Option<PooledConnection>,
    endpoint: String,
    /// 结束时回写熔断器
    admission: Option<Admission>,
    timeout: Duration,
    cache: Arc<QueryCache>,
    stats: Arc<OperationStats>,
    started_at: Instant,
    /// 执行过程中出现过错误
    failed: bool,
    /// 提交后需要失效缓存的写语句
    writes: Vec<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("conn", &self.conn)
            .field("failed", &self.failed)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        conn: PooledConnection,
        admission: Admission,
        timeout: Duration,
        cache: Arc<QueryCache>,
        stats: Arc<OperationStats>,
    ) -> Self {
        Self {
            conn: Some(conn),
            endpoint: admission.endpoint().to_string(),
            admission: Some(admission),
            timeout,
            cache,
            stats,
            started_at: Instant::now(),
            failed: false,
            writes: Vec::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn engine_id(&self) -> Option<u32> {
        self.conn.as_ref().map(|c| c.engine_id())
    }

    fn conn_mut(&mut self) -> ShieldResult<&mut PooledConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| crate::shield_error!(connection, "会话已结束"))
    }

    /// 在会话事务内执行语句，每条语句受会话超时约束
    pub async fn execute(&mut self, query: &str, params: &[JsonValue]) -> ShieldResult<QueryOutcome> {
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let conn = self.conn_mut()?;

        let result = match timeout_at(deadline, conn.execute(query, params)).await {
            Ok(result) => result,
            Err(_) => {
                conn.mark_broken();
                Err(crate::shield_error!(timeout, timeout.as_millis() as u64))
            }
        };

        match &result {
            Ok(_) if StatementKind::classify(query).is_mutating() => self.writes.push(query.to_string()),
            Ok(_) => {}
            Err(e) => {
                self.failed = true;
                debug!("会话语句执行失败: endpoint={}, error={}", self.endpoint, e);
            }
        }
        result
    }

    /// 提交事务并归还连接
    pub async fn commit(mut self) -> ShieldResult<()> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.commit().await,
            None => Ok(()),
        };

        match &result {
            Ok(()) => {
                for query in std::mem::take(&mut self.writes) {
                    self.cache.invalidate_for_write(&query);
                }
                self.finish(Outcome::Success);
            }
            Err(e) => {
                warn!("会话提交失败，执行回滚: endpoint={}, error={}", self.endpoint, e);
                if let Some(conn) = self.conn.as_mut() {
                    if conn.rollback().await.is_err() {
                        conn.mark_broken();
                    }
                }
                self.finish(Outcome::Failure);
            }
        }
        result
    }

    /// 回滚事务并归还连接
    ///
    /// 执行过程中出现过错误的会话按失败计入熔断器
    pub async fn rollback(mut self) -> ShieldResult<()> {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.rollback().await,
            None => Ok(()),
        };
        if result.is_err() {
            if let Some(conn) = self.conn.as_mut() {
                conn.mark_broken();
            }
        }

        let outcome = if self.failed || result.is_err() {
            Outcome::Failure
        } else {
            Outcome::Success
        };
        self.finish(outcome);
        result
    }

    pub(crate) fn mark_failed(&mut self) {
        self.failed = true;
    }

    fn finish(&mut self, outcome: Outcome) {
        self.conn = None;
        let admission = self.admission.take();
        match outcome {
            Outcome::Success => {
                if let Some(admission) = admission {
                    admission.success();
                }
                self.stats.record_success(self.started_at.elapsed());
            }
            Outcome::Failure => {
                if let Some(admission) = admission {
                    admission.failure();
                }
                let error = crate::shield_error!(execution, format!("会话失败: {}", self.endpoint));
                self.stats.record_failure(&error);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        warn!("会话未显式结束，后台回滚: endpoint={}", self.endpoint);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if conn.rollback().await.is_err() {
                        conn.mark_broken();
                    }
                });
            }
            Err(_) => conn.mark_broken(),
        }
        if let Some(admission) = self.admission.take() {
            admission.failure();
        }
        let error = crate::shield_error!(execution, format!("会话被丢弃: {}", self.endpoint));
        self.stats.record_failure(&error);
    }
}
