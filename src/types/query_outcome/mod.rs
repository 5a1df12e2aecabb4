use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 查询结果行（列名 -> 值）
pub type Row = serde_json::Map<String, JsonValue>;

/// 查询参数（按位置绑定）
pub type QueryParams = Vec<JsonValue>;

/// 查询执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// 读操作返回的结果行
    Rows(Vec<Row>),
    /// 写操作影响的行数
    Affected(u64),
}

impl QueryOutcome {
    /// 获取结果行（写操作返回空切片）
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Affected(_) => &[],
        }
    }

    /// 获取影响行数（读操作返回结果行数）
    pub fn row_count(&self) -> u64 {
        match self {
            QueryOutcome::Rows(rows) => rows.len() as u64,
            QueryOutcome::Affected(n) => *n,
        }
    }

    /// 是否为结果行
    pub fn is_rows(&self) -> bool {
        matches!(self, QueryOutcome::Rows(_))
    }
}

/// SQL 语句类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// 只读查询
    Read,
    /// 数据修改
    Write,
    /// 结构变更
    Ddl,
    /// 事务控制
    Transaction,
    /// 无法识别
    Other,
}

impl StatementKind {
    /// 根据首个关键字判断语句类别
    pub fn classify(query: &str) -> Self {
        let trimmed = query.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        let keyword = trimmed
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_uppercase();

        match keyword.as_str() {
            "SELECT" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "VALUES" => StatementKind::Read,
            "WITH" => {
                // 带有写子句的 CTE 视为写操作
                let upper = trimmed.to_uppercase();
                let writes = ["INSERT ", "UPDATE ", "DELETE "];
                if writes.iter().any(|w| upper.contains(w)) {
                    StatementKind::Write
                } else {
                    StatementKind::Read
                }
            }
            "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "MERGE" | "UPSERT" => StatementKind::Write,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" => StatementKind::Ddl,
            "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" => {
                StatementKind::Transaction
            }
            _ => StatementKind::Other,
        }
    }

    /// 是否会修改数据或结构
    pub fn is_mutating(&self) -> bool {
        !matches!(self, StatementKind::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_classification() {
        assert_eq!(StatementKind::classify("  select * from users"), StatementKind::Read);
        assert_eq!(StatementKind::classify("(SELECT 1)"), StatementKind::Read);
        assert_eq!(StatementKind::classify("INSERT INTO t VALUES (1)"), StatementKind::Write);
        assert_eq!(StatementKind::classify("update t set a = 1"), StatementKind::Write);
        assert_eq!(StatementKind::classify("DROP TABLE t"), StatementKind::Ddl);
        assert_eq!(StatementKind::classify("COMMIT"), StatementKind::Transaction);
        assert_eq!(
            StatementKind::classify("WITH gone AS (DELETE FROM t RETURNING id) SELECT * FROM gone"),
            StatementKind::Write
        );
        assert_eq!(
            StatementKind::classify("WITH recent AS (SELECT * FROM t) SELECT * FROM recent"),
            StatementKind::Read
        );
        assert!(StatementKind::classify("VACUUM").is_mutating());
        assert!(!StatementKind::classify("select 1").is_mutating());
    }

    #[test]
    fn test_outcome_accessors() {
        let mut row = Row::new();
        row.insert("id".to_string(), JsonValue::from(1));
        let rows = QueryOutcome::Rows(vec![row]);
        assert_eq!(rows.row_count(), 1);
        assert!(rows.is_rows());

        let affected = QueryOutcome::Affected(3);
        assert_eq!(affected.row_count(), 3);
        assert!(affected.rows().is_empty());
    }
}
