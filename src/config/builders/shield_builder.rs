//! # 弹性层总配置构建器模块

use crate::config::core::{
    BreakerConfig, MonitorConfig, PoolConfig, QueryCacheConfig, SchedulerConfig, ShieldConfig,
    ThresholdConfig,
};
use crate::error::ShieldResult;
use rat_logger::info;

/// 弹性层总配置构建器
///
/// 数据库URL必须显式设置，其余配置段默认使用经验值
#[derive(Debug)]
pub struct ShieldConfigBuilder {
    database_url: Option<String>,
    config: ShieldConfig,
    from_env: bool,
}

impl ShieldConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            database_url: None,
            config: ShieldConfig::default(),
            from_env: false,
        }
    }

    /// 设置数据库URL
    ///
    /// # 参数
    ///
    /// * `url` - 连接URL，例如 `sqlite::memory:`、`postgres://user@host/db`
    pub fn database_url<S: Into<String>>(mut self, url: S) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// 设置连接池配置
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// 设置熔断器配置
    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    /// 设置查询缓存配置
    pub fn cache(mut self, cache: QueryCacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// 设置调度器配置
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    /// 设置后台任务周期配置
    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.config.monitor = monitor;
        self
    }

    /// 设置优化器阈值配置
    pub fn thresholds(mut self, thresholds: ThresholdConfig) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    /// 构建时读取环境变量覆盖（DATABASE_URL、DB_POOL_SIZE 等）
    pub fn with_env_overrides(mut self) -> Self {
        self.from_env = true;
        self
    }

    /// 构建总配置
    ///
    /// # 错误
    ///
    /// 数据库URL未设置或任一配置段不合理时返回错误
    pub fn build(self) -> ShieldResult<ShieldConfig> {
        let mut config = self.config;

        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if self.from_env {
            config.apply_env_overrides()?;
        }

        if config.database_url.trim().is_empty() {
            return Err(crate::shield_error!(config, "数据库URL必须设置"));
        }

        config.validate()?;

        info!(
            "创建弹性层配置: 初始连接数={}, 最大连接数={}, 最大引擎数={}",
            config.pool.pool_size, config.pool.max_pool_size, config.pool.max_engines
        );

        Ok(config)
    }
}

impl Default for ShieldConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
