//! rat_dbshield - 数据库连接弹性层
//!
//! 在应用与数据库之间提供自适应多引擎连接池、按端点的自适应熔断器、
//! 带安全 LIMIT 改写的查询缓存、连接泄漏检测与负载预测，
//! 由主控制器驱动后台优化、自动扩缩容与健康检查。
//!
//! 日志系统由调用者自行初始化，本库只通过 `rat_logger` 宏输出日志。

// 条件编译调试宏 - 只有在 debug 模式下才输出调试信息
#[cfg(debug_assertions)]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        rat_logger::debug!($($arg)*);
    };
}

#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        // 在 release 模式下不输出调试信息
    };
}

// 导出所有公共模块
pub mod error;
pub mod i18n;
pub mod types;
pub mod config;
pub mod metrics;
pub mod pool;
pub mod breaker;
pub mod cache;
pub mod scheduler;
pub mod facade;
pub mod controller;

// 重新导出常用类型和函数
pub use error::{ShieldError, ShieldResult};
pub use types::*;
pub use config::{
    BreakerConfig, MonitorConfig, PoolConfig, PoolConfigBuilder, QueryCacheConfig, SchedulerConfig,
    ShieldConfig, ShieldConfigBuilder, ThresholdConfig,
};
pub use metrics::{HostProbe, MetricsSample, MetricsSampler, StaticProbe, SysinfoProbe};
pub use pool::{
    ConnectionPoolManager, DatabaseDriver, DriverConnection, LeakDetector, LoadPredictor, PoolHealth,
    ScalingAction, ScalingDecision,
};
#[cfg(any(feature = "sqlite-support", feature = "postgres-support", feature = "mysql-support"))]
pub use pool::SqlxAnyDriver;
pub use breaker::{Admission, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use cache::{CacheStats, QueryCache};
pub use scheduler::QueryScheduler;
pub use facade::{ResilienceFacade, Session};
pub use controller::{ComprehensiveStatus, HealthReport, MasterController};

/// 初始化rat_dbshield库
///
/// 初始化多语言错误消息系统
///
/// 注意：日志系统由调用者自行初始化，本库不会自动初始化日志
pub fn init() {
    i18n::ErrorMessageI18n::init();
}

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 获取库信息
pub fn get_info() -> String {
    format!("{} v{}", NAME, VERSION)
}
