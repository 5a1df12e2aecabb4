//! 查询缓存模块
//!
//! 查询改写（安全 LIMIT）、内容寻址的结果缓存与按表失效

pub mod key_generator;
pub mod optimizer;
pub mod query_cache;
pub mod stats;

pub use key_generator::{extract_tables, generate_cache_key, normalize_query};
pub use optimizer::QueryOptimizer;
pub use query_cache::{CacheEntry, OptimizedQuery, QueryCache};
pub use stats::CacheStats;
