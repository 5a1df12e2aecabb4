//! # 连接池配置构建器模块
//!
//! 提供连接池配置的构建器实现，支持链式调用和严格验证

use crate::config::core::PoolConfig;
use crate::error::ShieldResult;
use rat_logger::info;

/// 连接池配置构建器
///
/// 未设置的项沿用 `PoolConfig::default()` 中的经验值
#[derive(Debug)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfig {
    /// 创建连接池配置构建器
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }
}

impl PoolConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// 设置每个引擎的初始连接数
    ///
    /// # 参数
    ///
    /// * `pool_size` - 初始连接数
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.config.pool_size = pool_size;
        self
    }

    /// 设置每个引擎的最大连接数
    ///
    /// # 参数
    ///
    /// * `max_pool_size` - 最大连接数
    pub fn max_pool_size(mut self, max_pool_size: u32) -> Self {
        self.config.max_pool_size = max_pool_size;
        self
    }

    /// 设置连接超时时间（秒）
    pub fn connection_timeout(mut self, timeout: u64) -> Self {
        self.config.connection_timeout_secs = timeout;
        self
    }

    /// 设置连接泄漏阈值（秒）
    pub fn leak_threshold(mut self, seconds: u64) -> Self {
        self.config.leak_threshold_secs = seconds;
        self
    }

    /// 设置最大引擎数量
    pub fn max_engines(mut self, max_engines: usize) -> Self {
        self.config.max_engines = max_engines;
        self
    }

    /// 设置扩容阈值（利用率百分比、CPU百分比）
    pub fn scale_up_thresholds(mut self, utilization: f64, cpu: f64) -> Self {
        self.config.scale_up_utilization = utilization;
        self.config.scale_up_cpu = cpu;
        self
    }

    /// 设置缩容利用率阈值（百分比）
    pub fn scale_down_threshold(mut self, utilization: f64) -> Self {
        self.config.scale_down_utilization = utilization;
        self
    }

    /// 构建连接池配置
    ///
    /// # 错误
    ///
    /// 连接数范围、超时或扩缩容阈值不合理时返回错误
    pub fn build(self) -> ShieldResult<PoolConfig> {
        let config = self.config;

        if config.pool_size == 0 {
            return Err(crate::shield_error!(config, "初始连接数不能为零"));
        }

        if config.pool_size > config.max_pool_size {
            return Err(crate::shield_error!(config, "初始连接数不能大于最大连接数"));
        }

        if config.connection_timeout_secs == 0 {
            return Err(crate::shield_error!(config, "连接超时时间不能为零"));
        }

        if config.leak_threshold_secs == 0 {
            return Err(crate::shield_error!(config, "泄漏阈值不能为零"));
        }

        if config.max_engines == 0 {
            return Err(crate::shield_error!(config, "最大引擎数量不能为零"));
        }

        if config.scale_down_utilization >= config.scale_up_utilization {
            return Err(crate::shield_error!(config, "缩容阈值必须小于扩容阈值"));
        }

        info!(
            "创建连接池配置: 初始连接数={}, 最大连接数={}, 连接超时={}s",
            config.pool_size, config.max_pool_size, config.connection_timeout_secs
        );

        Ok(config)
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_builder_validation() {
        let config = PoolConfig::builder()
            .pool_size(5)
            .max_pool_size(20)
            .connection_timeout(3)
            .build()
            .unwrap();
        assert_eq!(config.max_overflow(), 15);

        assert!(PoolConfig::builder().pool_size(0).build().is_err());
        assert!(PoolConfig::builder().pool_size(30).max_pool_size(10).build().is_err());
        assert!(PoolConfig::builder().scale_up_thresholds(20.0, 85.0).build().is_err());
    }
}
