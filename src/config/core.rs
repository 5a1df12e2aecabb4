//! # 配置管理模块 - 核心配置类型
//!
//! 所有配置项都带有经验默认值，可通过配置文件、环境变量或构建器覆盖

use crate::error::{ShieldError, ShieldResult};
use rat_logger::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 弹性层总配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// 后端存储连接URL
    pub database_url: String,
    /// 连接池配置
    pub pool: PoolConfig,
    /// 熔断器配置
    pub breaker: BreakerConfig,
    /// 查询缓存配置
    pub cache: QueryCacheConfig,
    /// 查询调度器配置
    pub scheduler: SchedulerConfig,
    /// 后台任务周期配置
    pub monitor: MonitorConfig,
    /// 优化器阈值配置
    pub thresholds: ThresholdConfig,
}

/// 连接池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 每个引擎的初始连接数
    pub pool_size: u32,
    /// 每个引擎的最大连接数（超出 pool_size 的部分为溢出连接）
    pub max_pool_size: u32,
    /// 单连接获取/执行超时（秒）
    pub connection_timeout_secs: u64,
    /// 连接泄漏阈值（秒）
    pub leak_threshold_secs: u64,
    /// 最大引擎数量
    pub max_engines: usize,
    /// 扩容利用率阈值（百分比）
    pub scale_up_utilization: f64,
    /// 扩容CPU阈值（百分比）
    pub scale_up_cpu: f64,
    /// 缩容利用率阈值（百分比）
    pub scale_down_utilization: f64,
    /// 扩容判断使用的样本数
    pub scale_up_window: usize,
    /// 缩容判断使用的样本数
    pub scale_down_window: usize,
}

/// 熔断器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// 初始失败阈值
    pub initial_threshold: u32,
    /// 自适应阈值下限
    pub min_threshold: u32,
    /// 自适应阈值上限
    pub max_threshold: u32,
    /// 失败统计窗口（秒）
    pub failure_window_secs: u64,
    /// 失败历史保留窗口（秒）
    pub history_window_secs: u64,
    /// 半开状态下恢复所需的连续成功次数
    pub half_open_success_threshold: u32,
    /// 半开状态下允许的试探请求数
    pub half_open_max_requests: u32,
    /// 恢复超时基数（秒）
    pub base_recovery_secs: u64,
    /// 恢复超时上限（秒）
    pub max_recovery_secs: u64,
    /// 恢复超时抖动比例
    pub jitter_ratio: f64,
    /// 触发阈值自适应所需的最少历史失败数
    pub adaptation_min_samples: usize,
}

/// 查询缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// 是否启用缓存
    pub enabled: bool,
    /// 最大缓存条目数
    pub max_entries: usize,
    /// 单条结果允许缓存的最大行数
    pub max_cached_rows: usize,
    /// 无界查询追加的安全 LIMIT
    pub safety_limit: u64,
    /// 高数据量表名单
    pub high_volume_tables: Vec<String>,
    /// 快查询阈值（毫秒）
    pub fast_query_ms: u64,
    /// 中速查询阈值（毫秒）
    pub medium_query_ms: u64,
    /// 快查询 TTL（秒）
    pub fast_ttl_secs: u64,
    /// 中速查询 TTL（秒）
    pub medium_ttl_secs: u64,
    /// 慢查询 TTL（秒）
    pub slow_ttl_secs: u64,
}

/// 查询调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 基础并发数
    pub base_concurrency: usize,
    /// 并发下限
    pub min_concurrency: usize,
    /// 并发上限
    pub max_concurrency: usize,
    /// 批量执行时每组的操作数
    pub batch_size: usize,
}

/// 后台任务周期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 指标采样与泄漏扫描周期（秒）
    pub sample_interval_secs: u64,
    /// 指标环形缓冲区容量
    pub history_capacity: usize,
    /// 优化器周期（秒）
    pub optimizer_interval_secs: u64,
    /// 自动扩缩容周期（秒）
    pub autoscale_interval_secs: u64,
    /// 健康检查周期（秒）
    pub health_interval_secs: u64,
}

/// 优化器阈值配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// CPU 使用率阈值（百分比）
    pub cpu_percent: f64,
    /// 内存使用率阈值（百分比）
    pub memory_percent: f64,
    /// 错误率阈值（0-1）
    pub error_rate: f64,
    /// 缓存命中率阈值（0-1）
    pub cache_hit_rate: f64,
    /// 健康分低于此值时进入紧急模式
    pub critical_health_score: f64,
    /// 错误率高于此值时进入紧急模式（0-1）
    pub emergency_error_rate: f64,
    /// 计算错误率所需的最少请求数
    pub min_outcomes: usize,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            pool: PoolConfig::default(),
            breaker: BreakerConfig::default(),
            cache: QueryCacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            monitor: MonitorConfig::default(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            max_pool_size: 100,
            connection_timeout_secs: 10,
            leak_threshold_secs: 300,
            max_engines: 5,
            scale_up_utilization: 80.0,
            scale_up_cpu: 85.0,
            scale_down_utilization: 30.0,
            scale_up_window: 10,
            scale_down_window: 20,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 5,
            min_threshold: 2,
            max_threshold: 10,
            failure_window_secs: 300,
            history_window_secs: 3600,
            half_open_success_threshold: 3,
            half_open_max_requests: 3,
            base_recovery_secs: 30,
            max_recovery_secs: 300,
            jitter_ratio: 0.1,
            adaptation_min_samples: 10,
        }
    }
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            max_cached_rows: 1000,
            safety_limit: 1000,
            high_volume_tables: vec![
                "logs".to_string(),
                "audit_logs".to_string(),
                "events".to_string(),
                "metrics".to_string(),
                "scan_results".to_string(),
            ],
            fast_query_ms: 100,
            medium_query_ms: 1000,
            fast_ttl_secs: 300,
            medium_ttl_secs: 180,
            slow_ttl_secs: 60,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_concurrency: 20,
            min_concurrency: 2,
            max_concurrency: 100,
            batch_size: 50,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 10,
            history_capacity: 1000,
            optimizer_interval_secs: 30,
            autoscale_interval_secs: 60,
            health_interval_secs: 15,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 85.0,
            memory_percent: 85.0,
            error_rate: 0.1,
            cache_hit_rate: 0.3,
            critical_health_score: 30.0,
            emergency_error_rate: 0.5,
            min_outcomes: 10,
        }
    }
}

impl PoolConfig {
    /// 每个引擎允许的溢出连接数
    pub fn max_overflow(&self) -> u32 {
        self.max_pool_size.saturating_sub(self.pool_size)
    }

    /// 单连接超时
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// 泄漏阈值
    pub fn leak_threshold(&self) -> Duration {
        Duration::from_secs(self.leak_threshold_secs)
    }
}

impl ShieldConfig {
    /// 创建配置构建器
    pub fn builder() -> super::builders::ShieldConfigBuilder {
        super::builders::ShieldConfigBuilder::new()
    }

    /// 从配置文件加载配置（按扩展名识别 TOML 或 JSON）
    ///
    /// # 参数
    ///
    /// * `config_path` - 配置文件路径
    pub fn from_file<P: AsRef<std::path::Path>>(config_path: P) -> ShieldResult<Self> {
        let content = std::fs::read_to_string(config_path.as_ref())?;

        let config: ShieldConfig =
            if config_path.as_ref().extension().and_then(|s| s.to_str()) == Some("toml") {
                toml::from_str(&content)
                    .map_err(|e| crate::shield_error!(config, format!("解析TOML配置文件失败: {}", e)))?
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| crate::shield_error!(config, format!("解析JSON配置文件失败: {}", e)))?
            };

        config.validate()?;
        info!("从文件加载配置: {:?}", config_path.as_ref());
        Ok(config)
    }

    /// 保存配置到文件
    ///
    /// # 参数
    ///
    /// * `config_path` - 配置文件路径
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, config_path: P) -> ShieldResult<()> {
        let content = if config_path.as_ref().extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::to_string_pretty(self)
                .map_err(|e| crate::shield_error!(config, format!("序列化TOML配置失败: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| crate::shield_error!(config, format!("序列化JSON配置失败: {}", e)))?
        };

        std::fs::write(config_path.as_ref(), content)?;

        info!("保存配置到文件: {:?}", config_path.as_ref());
        Ok(())
    }

    /// 从环境变量加载配置（未设置的项使用默认值）
    pub fn from_env() -> ShieldResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 使用环境变量覆盖当前配置
    pub fn apply_env_overrides(&mut self) -> ShieldResult<()> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(v) = env_parse::<u32>("DB_POOL_SIZE")? {
            self.pool.pool_size = v;
        }
        if let Some(v) = env_parse::<u32>("DB_MAX_POOL_SIZE")? {
            self.pool.max_pool_size = v;
        }
        if let Some(v) = env_parse::<u64>("DB_POOL_TIMEOUT")? {
            self.pool.connection_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("DB_LEAK_THRESHOLD_SECONDS")? {
            self.pool.leak_threshold_secs = v;
        }
        if let Some(v) = env_parse::<f64>("DB_CPU_THRESHOLD")? {
            self.thresholds.cpu_percent = v;
        }
        if let Some(v) = env_parse::<f64>("DB_MEMORY_THRESHOLD")? {
            self.thresholds.memory_percent = v;
        }
        if let Some(v) = env_parse::<f64>("DB_ERROR_RATE_THRESHOLD")? {
            self.thresholds.error_rate = v;
        }
        if let Some(v) = env_parse::<f64>("DB_CACHE_HIT_RATE_THRESHOLD")? {
            self.thresholds.cache_hit_rate = v;
        }
        debug!("已应用环境变量配置覆盖");
        Ok(())
    }

    /// 验证配置的合理性
    pub fn validate(&self) -> ShieldResult<()> {
        let pool = &self.pool;
        if pool.pool_size == 0 {
            return Err(crate::shield_error!(config, "初始连接数不能为零"));
        }
        if pool.pool_size > pool.max_pool_size {
            return Err(crate::shield_error!(config, "初始连接数不能大于最大连接数"));
        }
        if pool.connection_timeout_secs == 0 {
            return Err(crate::shield_error!(config, "连接超时时间不能为零"));
        }
        if pool.leak_threshold_secs == 0 {
            return Err(crate::shield_error!(config, "泄漏阈值不能为零"));
        }
        if pool.max_engines == 0 {
            return Err(crate::shield_error!(config, "最大引擎数量不能为零"));
        }
        if pool.scale_down_utilization >= pool.scale_up_utilization {
            return Err(crate::shield_error!(config, "缩容阈值必须小于扩容阈值"));
        }

        let breaker = &self.breaker;
        if breaker.min_threshold == 0 || breaker.min_threshold > breaker.max_threshold {
            return Err(crate::shield_error!(config, "熔断阈值范围无效"));
        }
        if breaker.initial_threshold < breaker.min_threshold
            || breaker.initial_threshold > breaker.max_threshold
        {
            return Err(crate::shield_error!(config, "初始熔断阈值必须位于阈值范围内"));
        }
        if !(0.0..1.0).contains(&breaker.jitter_ratio) {
            return Err(crate::shield_error!(config, "抖动比例必须位于 [0, 1) 区间"));
        }

        let scheduler = &self.scheduler;
        if scheduler.min_concurrency == 0 || scheduler.min_concurrency > scheduler.max_concurrency {
            return Err(crate::shield_error!(config, "调度器并发范围无效"));
        }
        if scheduler.batch_size == 0 {
            return Err(crate::shield_error!(config, "批处理大小不能为零"));
        }

        let monitor = &self.monitor;
        if monitor.history_capacity == 0 {
            return Err(crate::shield_error!(config, "指标缓冲区容量不能为零"));
        }
        if monitor.sample_interval_secs == 0
            || monitor.optimizer_interval_secs == 0
            || monitor.autoscale_interval_secs == 0
            || monitor.health_interval_secs == 0
        {
            return Err(crate::shield_error!(config, "后台任务周期不能为零"));
        }

        let thresholds = &self.thresholds;
        for (name, rate) in [
            ("error_rate", thresholds.error_rate),
            ("cache_hit_rate", thresholds.cache_hit_rate),
            ("emergency_error_rate", thresholds.emergency_error_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(crate::shield_error!(validation, name, "比例阈值必须位于 [0, 1] 区间"));
            }
        }

        Ok(())
    }
}

/// 解析环境变量，未设置时返回 None
fn env_parse<T: std::str::FromStr>(key: &str) -> ShieldResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| -> ShieldError {
                crate::shield_error!(config, format!("环境变量 {} 的值无效: {}", key, raw))
            }),
        Err(_) => Ok(None),
    }
}
