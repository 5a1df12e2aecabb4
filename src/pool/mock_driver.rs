//! 内存模拟驱动（仅测试使用）

use super::driver::{DatabaseDriver, DriverConnection};
use crate::error::ShieldResult;
use crate::types::{QueryOutcome, Row, StatementKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// 模拟驱动的共享状态
#[derive(Debug, Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_queries: AtomicBool,
    pub delay_ms: AtomicU64,
    pub rows_per_select: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
}

impl MockState {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[derive(Debug, Clone)]
pub struct MockDriver {
    pub state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        let state = MockState::default();
        state.rows_per_select.store(1, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    async fn connect(&self) -> ShieldResult<Box<dyn DriverConnection>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(crate::shield_error!(connection, "mock connect refused"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn execute(&mut self, query: &str, _params: &[JsonValue]) -> ShieldResult<QueryOutcome> {
        self.state.executed.lock().push(query.to_string());

        let delay = self.state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_queries.load(Ordering::SeqCst) {
            return Err(crate::shield_error!(execution, "mock query failure"));
        }

        if StatementKind::classify(query) == StatementKind::Read {
            let count = self.state.rows_per_select.load(Ordering::SeqCst);
            let rows = (0..count)
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("id".to_string(), json!(i));
                    row
                })
                .collect();
            Ok(QueryOutcome::Rows(rows))
        } else {
            Ok(QueryOutcome::Affected(1))
        }
    }

    async fn begin(&mut self) -> ShieldResult<()> {
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&mut self) -> ShieldResult<()> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> ShieldResult<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&mut self) -> ShieldResult<()> {
        Ok(())
    }
}
