//! 后端存储驱动接口
//!
//! 连接池只依赖这两个 trait，具体的数据库实现通过驱动注入

use crate::error::ShieldResult;
use crate::types::QueryOutcome;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// 数据库驱动，负责建立新连接
#[async_trait]
pub trait DatabaseDriver: Send + Sync + std::fmt::Debug {
    /// 建立一条新连接
    async fn connect(&self) -> ShieldResult<Box<dyn DriverConnection>>;

    /// 驱动名称
    fn name(&self) -> &str;
}

/// 单条物理连接
#[async_trait]
pub trait DriverConnection: Send {
    /// 执行语句，读操作返回结果行，写操作返回影响行数
    async fn execute(&mut self, query: &str, params: &[JsonValue]) -> ShieldResult<QueryOutcome>;

    /// 开启事务
    async fn begin(&mut self) -> ShieldResult<()>;

    /// 提交事务
    async fn commit(&mut self) -> ShieldResult<()>;

    /// 回滚事务
    async fn rollback(&mut self) -> ShieldResult<()>;

    /// 连接健康检查
    async fn ping(&mut self) -> ShieldResult<()>;
}
