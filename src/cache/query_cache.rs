//! 查询结果缓存模块
//!
//! 以内容寻址方式缓存查询结果，TTL 随执行耗时自适应（越快的查询缓存越久）

use super::key_generator::{extract_tables, generate_cache_key};
use super::optimizer::QueryOptimizer;
use super::stats::{CacheCounters, CacheStats};
use crate::config::QueryCacheConfig;
use crate::types::{QueryOutcome, QueryParams, StatementKind};
use dashmap::DashMap;
use rat_logger::{debug, info};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use tokio::time::{Duration, Instant};

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: QueryOutcome,
    pub created_at: Instant,
    pub ttl: Duration,
    /// 产生该结果的执行耗时
    pub exec_time: Duration,
    pub tables: Vec<String>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// 查询优化结果
#[derive(Debug, Clone)]
pub struct OptimizedQuery {
    /// 改写后的查询
    pub query: String,
    /// 改写后的参数
    pub params: QueryParams,
    /// 语句类别
    pub kind: StatementKind,
    /// 是否追加了安全 LIMIT
    pub rewritten: bool,
    /// 命中的缓存结果
    pub cached: Option<QueryOutcome>,
}

impl OptimizedQuery {
    pub fn from_cache(&self) -> bool {
        self.cached.is_some()
    }
}

/// 查询缓存
#[derive(Debug)]
pub struct QueryCache {
    config: QueryCacheConfig,
    optimizer: QueryOptimizer,
    entries: DashMap<String, CacheEntry>,
    /// 表名到缓存键的映射
    table_keys: DashMap<String, HashSet<String>>,
    counters: CacheCounters,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        let optimizer = QueryOptimizer::new(config.safety_limit, &config.high_volume_tables);
        info!(
            "查询缓存初始化: 启用={}, 最大条目={}, 安全LIMIT={}",
            config.enabled, config.max_entries, config.safety_limit
        );
        Self {
            config,
            optimizer,
            entries: DashMap::new(),
            table_keys: DashMap::new(),
            counters: CacheCounters::default(),
        }
    }

    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    /// 优化查询并查找缓存
    ///
    /// 写语句不参与缓存查找，也不计入命中率
    pub fn optimize(&self, query: &str, params: &[JsonValue], use_cache: bool) -> OptimizedQuery {
        let kind = StatementKind::classify(query);
        let (query, rewritten) = match self.optimizer.rewrite(query) {
            Some(rewritten) => {
                debug!("查询已追加安全LIMIT: {}", rewritten);
                (rewritten, true)
            }
            None => (query.to_string(), false),
        };

        let cached = if use_cache && self.config.enabled && !kind.is_mutating() {
            self.lookup(&generate_cache_key(&query, params))
        } else {
            None
        };

        OptimizedQuery {
            query,
            params: params.to_vec(),
            kind,
            rewritten,
            cached,
        }
    }

    fn lookup(&self, key: &str) -> Option<QueryOutcome> {
        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.is_expired(now), entry.payload.clone()));

        match found {
            Some((false, payload)) => {
                CacheCounters::add(&self.counters.hits, 1);
                debug!("查询缓存命中: key={}", key);
                Some(payload)
            }
            Some((true, _)) => {
                if let Some((_, entry)) = self.entries.remove_if(key, |_, e| e.is_expired(now)) {
                    self.untrack(&entry);
                    CacheCounters::add(&self.counters.expirations, 1);
                }
                CacheCounters::add(&self.counters.misses, 1);
                None
            }
            None => {
                CacheCounters::add(&self.counters.misses, 1);
                None
            }
        }
    }

    /// 按执行耗时决定 TTL
    pub fn ttl_for(&self, exec_time: Duration) -> Duration {
        let millis = exec_time.as_millis() as u64;
        let secs = if millis < self.config.fast_query_ms {
            self.config.fast_ttl_secs
        } else if millis < self.config.medium_query_ms {
            self.config.medium_ttl_secs
        } else {
            self.config.slow_ttl_secs
        };
        Duration::from_secs(secs)
    }

    /// 缓存查询结果，返回是否写入
    ///
    /// 写语句与超过行数上限的结果不会被缓存
    pub fn cache_result(
        &self,
        query: &str,
        params: &[JsonValue],
        result: &QueryOutcome,
        exec_time: Duration,
    ) -> bool {
        if !self.config.enabled || StatementKind::classify(query).is_mutating() {
            return false;
        }
        if result.rows().len() > self.config.max_cached_rows {
            debug!("跳过缓存过大查询结果: count={}", result.rows().len());
            return false;
        }

        let key = generate_cache_key(query, params);
        if !self.entries.contains_key(&key) {
            self.evict_if_full();
        }

        let entry = CacheEntry {
            key: key.clone(),
            payload: result.clone(),
            created_at: Instant::now(),
            ttl: self.ttl_for(exec_time),
            exec_time,
            tables: extract_tables(query),
        };

        for table in &entry.tables {
            self.table_keys
                .entry(table.clone())
                .or_default()
                .insert(key.clone());
        }

        debug!(
            "已缓存查询结果: key={}, ttl={}s, 耗时={:?}",
            key,
            entry.ttl.as_secs(),
            exec_time
        );
        self.entries.insert(key, entry);
        CacheCounters::add(&self.counters.writes, 1);
        true
    }

    /// 淘汰最旧条目直到低于容量上限
    fn evict_if_full(&self) {
        if self.config.max_entries == 0 {
            return;
        }
        while self.entries.len() >= self.config.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.created_at)
                .map(|e| e.key().clone());
            let Some(oldest) = oldest else { break };
            if let Some((_, entry)) = self.entries.remove(&oldest) {
                self.untrack(&entry);
                CacheCounters::add(&self.counters.evictions, 1);
            }
        }
    }

    fn untrack(&self, entry: &CacheEntry) {
        for table in &entry.tables {
            if let Some(mut keys) = self.table_keys.get_mut(table) {
                keys.remove(&entry.key);
            }
        }
        self.table_keys.retain(|_, keys| !keys.is_empty());
    }

    /// 使某张表相关的缓存全部失效，返回失效条目数
    pub fn invalidate_table(&self, table: &str) -> usize {
        let table = table.to_lowercase();
        let Some((_, keys)) = self.table_keys.remove(&table) else {
            return 0;
        };

        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.untrack(&entry);
                removed += 1;
            }
        }
        if removed > 0 {
            CacheCounters::add(&self.counters.invalidations, removed as u64);
            debug!("表缓存已失效: table={}, count={}", table, removed);
        }
        removed
    }

    /// 写语句成功后使其涉及的表缓存失效
    pub fn invalidate_for_write(&self, query: &str) -> usize {
        extract_tables(query)
            .iter()
            .map(|table| self.invalidate_table(table))
            .sum()
    }

    /// 清理过期条目，返回清理数量
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, e| e.is_expired(now)) {
                self.untrack(&entry);
                removed += 1;
            }
        }

        if removed > 0 {
            CacheCounters::add(&self.counters.expirations, removed as u64);
            debug!("清理过期缓存条目: {}", removed);
        }
        removed
    }

    /// 清空缓存
    pub fn clear(&self) {
        self.entries.clear();
        self.table_keys.clear();
        info!("查询缓存已清空");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.entries.len())
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate
    }

    /// 重置统计计数（条目保留）
    pub fn reset_stats(&self) {
        self.counters.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Row;
    use serde_json::json;

    fn rows(n: usize) -> QueryOutcome {
        QueryOutcome::Rows(
            (0..n)
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("id".to_string(), json!(i));
                    row
                })
                .collect(),
        )
    }

    #[test]
    fn test_ttl_policy() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        assert_eq!(cache.ttl_for(Duration::from_millis(50)), Duration::from_secs(300));
        assert_eq!(cache.ttl_for(Duration::from_millis(500)), Duration::from_secs(180));
        assert_eq!(cache.ttl_for(Duration::from_secs(2)), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_then_expire() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        let query = "SELECT * FROM users WHERE id = ?";
        let params = [json!(1)];

        let first = cache.optimize(query, &params, true);
        assert!(!first.from_cache());
        assert!(cache.cache_result(&first.query, &params, &rows(1), Duration::from_secs(2)));

        let second = cache.optimize(query, &params, true);
        assert!(second.from_cache());
        assert_eq!(second.cached.map(|r| r.row_count()), Some(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!cache.optimize(query, &params, true).from_cache());
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_respects_adaptive_ttl() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        cache.cache_result("SELECT 1 FROM fast", &[], &rows(1), Duration::from_millis(50));
        cache.cache_result("SELECT 1 FROM slow", &[], &rows(1), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(240)).await;
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mutations_and_large_results_are_not_cached() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        assert!(!cache.cache_result("DELETE FROM users", &[], &QueryOutcome::Affected(3), Duration::ZERO));
        assert!(!cache.cache_result("SELECT * FROM users", &[], &rows(1001), Duration::ZERO));

        let optimized = cache.optimize("UPDATE users SET a = 1", &[], true);
        assert!(!optimized.from_cache());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_invalidate_on_write() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        cache.cache_result("SELECT * FROM users", &[], &rows(2), Duration::ZERO);
        cache.cache_result("SELECT * FROM orders", &[], &rows(2), Duration::ZERO);

        assert_eq!(cache.invalidate_for_write("UPDATE users SET name = ?"), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_oldest_when_full() {
        let cache = QueryCache::new(QueryCacheConfig {
            max_entries: 2,
            ..QueryCacheConfig::default()
        });
        cache.cache_result("SELECT 1 FROM a", &[], &rows(1), Duration::ZERO);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.cache_result("SELECT 1 FROM b", &[], &rows(1), Duration::ZERO);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.cache_result("SELECT 1 FROM c", &[], &rows(1), Duration::ZERO);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.invalidate_table("a"), 0);
        assert_eq!(cache.invalidate_table("c"), 1);
    }

    #[test]
    fn test_safety_limit_rewrite_is_reported() {
        let cache = QueryCache::new(QueryCacheConfig::default());
        let optimized = cache.optimize("SELECT * FROM logs", &[], true);
        assert!(optimized.rewritten);
        assert_eq!(optimized.query, "SELECT * FROM logs LIMIT 1000");
    }
}
