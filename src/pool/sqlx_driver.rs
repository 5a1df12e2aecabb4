//! 基于 sqlx Any 驱动的通用实现
//!
//! 由 `sqlite-support`、`postgres-support`、`mysql-support` 特性启用，
//! 按 URL scheme 自动选择具体数据库

use super::driver::{DatabaseDriver, DriverConnection};
use crate::error::ShieldResult;
use crate::types::{QueryOutcome, Row as OutcomeRow, StatementKind};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use rat_logger::debug;
use serde_json::Value as JsonValue;
use sqlx::any::{AnyArguments, AnyConnection, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, Column, Connection, Row};

static DRIVERS_INSTALLED: OnceCell<()> = OnceCell::new();

/// sqlx Any 驱动
pub struct SqlxAnyDriver {
    url: String,
}

impl std::fmt::Debug for SqlxAnyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 不输出 URL，避免泄露凭据
        f.debug_struct("SqlxAnyDriver")
            .field("scheme", &self.url.split(':').next().unwrap_or(""))
            .finish()
    }
}

impl SqlxAnyDriver {
    pub fn new<S: Into<String>>(url: S) -> Self {
        DRIVERS_INSTALLED.get_or_init(sqlx::any::install_default_drivers);
        Self { url: url.into() }
    }
}

#[async_trait]
impl DatabaseDriver for SqlxAnyDriver {
    async fn connect(&self) -> ShieldResult<Box<dyn DriverConnection>> {
        let conn = AnyConnection::connect(&self.url)
            .await
            .map_err(|e| crate::shield_error!(connection, e))?;
        debug!("已建立 {} 连接", conn.backend_name());
        Ok(Box::new(SqlxAnyConnection { conn }))
    }

    fn name(&self) -> &str {
        "sqlx-any"
    }
}

/// sqlx Any 连接
pub struct SqlxAnyConnection {
    conn: AnyConnection,
}

fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &JsonValue,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        JsonValue::Null => query.bind(Option::<String>::None),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => query.bind(s.clone()),
        // 数组与对象以 JSON 文本绑定
        other => query.bind(other.to_string()),
    }
}

fn decode_row(row: &AnyRow) -> OutcomeRow {
    let mut decoded = OutcomeRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            v.map(JsonValue::from).unwrap_or(JsonValue::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            v.map(JsonValue::from).unwrap_or(JsonValue::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            v.map(JsonValue::from).unwrap_or(JsonValue::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            v.map(JsonValue::from).unwrap_or(JsonValue::Null)
        } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
            v.map(JsonValue::from).unwrap_or(JsonValue::Null)
        } else {
            JsonValue::Null
        };
        decoded.insert(column.name().to_string(), value);
    }
    decoded
}

impl SqlxAnyConnection {
    async fn run_plain(&mut self, statement: &str) -> ShieldResult<()> {
        sqlx::query(statement)
            .execute(&mut self.conn)
            .await
            .map_err(|e| crate::shield_error!(execution, e))?;
        Ok(())
    }
}

#[async_trait]
impl DriverConnection for SqlxAnyConnection {
    async fn execute(&mut self, query: &str, params: &[JsonValue]) -> ShieldResult<QueryOutcome> {
        let mut prepared = sqlx::query(query);
        for param in params {
            prepared = bind_value(prepared, param);
        }

        if StatementKind::classify(query) == StatementKind::Read {
            let rows = prepared
                .fetch_all(&mut self.conn)
                .await
                .map_err(|e| crate::shield_error!(execution, e))?;
            Ok(QueryOutcome::Rows(rows.iter().map(decode_row).collect()))
        } else {
            let result = prepared
                .execute(&mut self.conn)
                .await
                .map_err(|e| crate::shield_error!(execution, e))?;
            Ok(QueryOutcome::Affected(result.rows_affected()))
        }
    }

    async fn begin(&mut self) -> ShieldResult<()> {
        self.run_plain("BEGIN").await
    }

    async fn commit(&mut self) -> ShieldResult<()> {
        self.run_plain("COMMIT").await
    }

    async fn rollback(&mut self) -> ShieldResult<()> {
        self.run_plain("ROLLBACK").await
    }

    async fn ping(&mut self) -> ShieldResult<()> {
        self.conn
            .ping()
            .await
            .map_err(|e| crate::shield_error!(connection, e))
    }
}

#[cfg(all(test, feature = "sqlite-support"))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let driver = SqlxAnyDriver::new("sqlite::memory:");
        let mut conn = driver.connect().await.unwrap();
        conn.ping().await.unwrap();

        conn.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        let inserted = conn
            .execute("INSERT INTO items (id, name) VALUES (?, ?)", &[json!(1), json!("alpha")])
            .await
            .unwrap();
        assert_eq!(inserted, QueryOutcome::Affected(1));

        let rows = conn
            .execute("SELECT id, name FROM items WHERE id = ?", &[json!(1)])
            .await
            .unwrap();
        assert_eq!(rows.rows()[0].get("name"), Some(&json!("alpha")));
    }
}
