//! 连接池模块
//!
//! 多引擎连接池：主引擎常驻，负载升高时按采样历史扩容新引擎，
//! 借出连接由泄漏检测器跟踪，超时未归还的连接被强制回收。

pub mod driver;
pub mod engine;
pub mod leak_detector;
pub mod manager;
pub mod predictor;
pub mod scaling;
pub mod types;

#[cfg(any(feature = "sqlite-support", feature = "postgres-support", feature = "mysql-support"))]
pub mod sqlx_driver;

#[cfg(test)]
pub mod mock_driver;

pub use driver::{DatabaseDriver, DriverConnection};
pub use engine::{EnginePool, EngineStatus, PooledConnection};
pub use leak_detector::{ConnectionHandle, LeakDetector};
pub use manager::ConnectionPoolManager;
pub use predictor::LoadPredictor;
pub use types::{PoolHealth, ScalingAction, ScalingDecision};

#[cfg(any(feature = "sqlite-support", feature = "postgres-support", feature = "mysql-support"))]
pub use sqlx_driver::{SqlxAnyConnection, SqlxAnyDriver};
