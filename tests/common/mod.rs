//! 集成测试公共设施：内存模拟驱动与日志初始化

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rat_dbshield::{
    DatabaseDriver, DriverConnection, MasterController, PoolConfig, QueryOutcome, Row, ShieldConfig,
    ShieldResult, StatementKind, StaticProbe,
};
use rat_logger::{LevelFilter, LoggerBuilder, handler::term::TermConfig};
use serde_json::{Value as JsonValue, json};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static LOGGER: Once = Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = LoggerBuilder::new()
            .with_level(LevelFilter::Warn)
            .add_terminal_with_config(TermConfig::default())
            .init();
        rat_dbshield::init();
    });
}

#[derive(Debug, Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub fail_queries: AtomicBool,
    pub delay_ms: AtomicU64,
    pub executed: Mutex<Vec<String>>,
}

impl MockState {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    pub state: Arc<MockState>,
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    async fn connect(&self) -> ShieldResult<Box<dyn DriverConnection>> {
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
            return Err(rat_dbshield::shield_error!(execution, "mock query failure"));
        }
        if StatementKind::classify(query) == StatementKind::Read {
            let mut row = Row::new();
            row.insert("id".to_string(), json!(1));
            Ok(QueryOutcome::Rows(vec![row]))
        } else {
            Ok(QueryOutcome::Affected(1))
        }
    }

    async fn begin(&mut self) -> ShieldResult<()> {
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

pub fn test_config() -> ShieldConfig {
    ShieldConfig {
        database_url: "mock://resilience".to_string(),
        pool: PoolConfig {
            pool_size: 2,
            max_pool_size: 4,
            ..PoolConfig::default()
        },
        ..ShieldConfig::default()
    }
}

pub async fn controller_with(config: ShieldConfig) -> (MasterController, MockDriver) {
    init_logging();
    let driver = MockDriver::default();
    let controller = MasterController::with_probe(config, Arc::new(driver.clone()), Arc::new(StaticProbe::default()))
        .await
        .expect("控制器创建失败");
    (controller, driver)
}
