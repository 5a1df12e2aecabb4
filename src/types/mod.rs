//! 弹性层通用类型定义
//!
//! 定义请求优先级、运行模式以及查询结果等跨模块共享的类型

pub mod priority;
pub mod operation_mode;
pub mod query_outcome;

// 重新导出所有公共类型
pub use priority::Priority;
pub use operation_mode::{ModeProfile, OperationMode};
pub use query_outcome::{QueryOutcome, QueryParams, Row, StatementKind};
