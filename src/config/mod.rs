//! # 配置管理模块
//!
//! 提供统一的配置管理系统，支持配置文件、环境变量与构建器三种来源

pub mod builders;
pub mod core;

// 重新导出所有公共类型
pub use builders::{PoolConfigBuilder, ShieldConfigBuilder};
pub use self::core::{
    BreakerConfig, MonitorConfig, PoolConfig, QueryCacheConfig, SchedulerConfig, ShieldConfig,
    ThresholdConfig,
};
