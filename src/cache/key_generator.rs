//! 缓存键生成模块
//!
//! 缓存键 = 规范化查询文本 + 序列化参数 的 SHA-256 摘要

use once_cell::sync::Lazy;
use regex::Regex;
use rat_logger::debug;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// 缓存键前缀
pub const CACHE_KEY_PREFIX: &str = "rat_dbshield";

static TABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN|INTO|UPDATE|TABLE)\s+[`"\[]?([A-Za-z_][A-Za-z0-9_.]*)"#).unwrap()
});

/// 去掉首尾空白与末尾分号，保留语句原文
pub fn strip_statement(query: &str) -> &str {
    query.trim().trim_end_matches(';').trim_end()
}

/// 规范化查询文本：合并引号外的连续空白、去掉首尾空白与末尾分号
///
/// 单引号、双引号与反引号内的文本原样保留
pub fn normalize_query(query: &str) -> String {
    let stripped = strip_statement(query);
    let mut normalized = String::with_capacity(stripped.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for ch in stripped.chars() {
        match quote {
            Some(open) => {
                normalized.push(ch);
                if ch == open {
                    quote = None;
                }
            }
            None if ch.is_whitespace() => pending_space = true,
            None => {
                if pending_space && !normalized.is_empty() {
                    normalized.push(' ');
                }
                pending_space = false;
                if matches!(ch, '\'' | '"' | '`') {
                    quote = Some(ch);
                }
                normalized.push(ch);
            }
        }
    }
    normalized
}

/// 生成查询缓存键
pub fn generate_cache_key(query: &str, params: &[JsonValue]) -> String {
    let normalized = normalize_query(query);
    // 参数均为 JSON 值，序列化不会失败；失败时退化为 Debug 表示
    let params_signature =
        serde_json::to_string(params).unwrap_or_else(|_| format!("{:?}", params));

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0x1f]);
    hasher.update(params_signature.as_bytes());

    let key = format!("{}:query:{:x}", CACHE_KEY_PREFIX, hasher.finalize());
    debug!("生成查询缓存键: key={}", key);
    key
}

/// 提取查询引用的表名（小写，去掉模式前缀）
pub fn extract_tables(query: &str) -> Vec<String> {
    let mut tables: Vec<String> = TABLE_PATTERN
        .captures_iter(query)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let name = m.as_str();
            name.rsplit('.').next().unwrap_or(name).to_lowercase()
        })
        .collect();
    tables.sort();
    tables.dedup();
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_stable_across_whitespace() {
        let a = generate_cache_key("SELECT *  FROM users\n WHERE id = ?;", &[json!(1)]);
        let b = generate_cache_key("SELECT * FROM users WHERE id = ?", &[json!(1)]);
        assert_eq!(a, b);
        assert!(a.starts_with("rat_dbshield:query:"));
    }

    #[test]
    fn test_whitespace_inside_literals_is_significant() {
        assert_eq!(
            normalize_query("SELECT *\n FROM logs  WHERE msg = 'a  b' ;"),
            "SELECT * FROM logs WHERE msg = 'a  b'"
        );
        assert_eq!(normalize_query("SELECT \"my  col\" FROM t"), "SELECT \"my  col\" FROM t");

        let double = generate_cache_key("SELECT * FROM logs WHERE msg = 'a  b'", &[]);
        let single = generate_cache_key("SELECT * FROM logs WHERE msg = 'a b'", &[]);
        assert_ne!(double, single);
    }

    #[test]
    fn test_key_depends_on_params() {
        let a = generate_cache_key("SELECT * FROM users WHERE id = ?", &[json!(1)]);
        let b = generate_cache_key("SELECT * FROM users WHERE id = ?", &[json!(2)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_extract_tables() {
        assert_eq!(
            extract_tables("SELECT * FROM public.Users u JOIN orders o ON o.uid = u.id"),
            vec!["orders".to_string(), "users".to_string()]
        );
        assert_eq!(extract_tables("INSERT INTO logs (msg) VALUES (?)"), vec!["logs".to_string()]);
        assert_eq!(extract_tables("UPDATE \"events\" SET seen = 1"), vec!["events".to_string()]);
    }
}
