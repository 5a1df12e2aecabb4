//! 查询改写
//!
//! 对高数据量表上无界的 SELECT 追加安全 LIMIT，防止返回无界结果集

use super::key_generator::{extract_tables, normalize_query, strip_statement};
use crate::types::StatementKind;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(LIMIT|FETCH\s+FIRST|TOP)\b").unwrap());

static AGGREGATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX)\s*\(|\bGROUP\s+BY\b|\bDISTINCT\b").unwrap()
});

/// 查询改写器
#[derive(Debug, Clone)]
pub struct QueryOptimizer {
    safety_limit: u64,
    high_volume_tables: HashSet<String>,
}

impl QueryOptimizer {
    pub fn new<I, S>(safety_limit: u64, high_volume_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            safety_limit,
            high_volume_tables: high_volume_tables
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// 是否属于高数据量表
    pub fn is_high_volume(&self, table: &str) -> bool {
        self.high_volume_tables.contains(&table.to_lowercase())
    }

    /// 需要时改写查询，返回 None 表示保持原样
    ///
    /// 改写结果以调用方原文为基础，只在末尾追加 LIMIT
    pub fn rewrite(&self, query: &str) -> Option<String> {
        if self.safety_limit == 0 || StatementKind::classify(query) != StatementKind::Read {
            return None;
        }

        let normalized = normalize_query(query);
        if !normalized.to_uppercase().starts_with("SELECT") {
            return None;
        }
        if LIMIT_PATTERN.is_match(&normalized) || AGGREGATE_PATTERN.is_match(&normalized) {
            return None;
        }
        if !extract_tables(&normalized).iter().any(|t| self.is_high_volume(t)) {
            return None;
        }

        Some(format!("{} LIMIT {}", strip_statement(query), self.safety_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimizer() -> QueryOptimizer {
        QueryOptimizer::new(1000, ["logs", "events"])
    }

    #[test]
    fn test_appends_limit_to_unbounded_select() {
        let optimizer = optimizer();
        assert_eq!(
            optimizer.rewrite("SELECT * FROM logs").as_deref(),
            Some("SELECT * FROM logs LIMIT 1000")
        );
        assert_eq!(
            optimizer.rewrite("select id from Events where level = ?;").as_deref(),
            Some("select id from Events where level = ? LIMIT 1000")
        );
    }

    #[test]
    fn test_rewrite_keeps_original_text() {
        let optimizer = optimizer();
        assert_eq!(
            optimizer.rewrite("SELECT * FROM logs WHERE msg = 'a  b'").as_deref(),
            Some("SELECT * FROM logs WHERE msg = 'a  b' LIMIT 1000")
        );
        assert_eq!(
            optimizer.rewrite("  SELECT *\n  FROM logs ; ").as_deref(),
            Some("SELECT *\n  FROM logs LIMIT 1000")
        );
    }

    #[test]
    fn test_leaves_bounded_or_aggregate_queries() {
        let optimizer = optimizer();
        assert!(optimizer.rewrite("SELECT * FROM logs LIMIT 10").is_none());
        assert!(optimizer.rewrite("SELECT COUNT(*) FROM logs").is_none());
        assert!(optimizer.rewrite("SELECT level, max(ts) FROM logs GROUP BY level").is_none());
        assert!(optimizer.rewrite("SELECT * FROM users").is_none());
        assert!(optimizer.rewrite("DELETE FROM logs").is_none());
    }
}
