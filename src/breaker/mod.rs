//! # 熔断器模块
//!
//! 每个逻辑端点（如 `query@normal`、`session@critical`）拥有独立的
//! 关闭/打开/半开状态机与自适应失败阈值。打开状态下请求被立即拒绝，不会触碰连接池。

pub mod admission;
pub mod circuit_breaker;
pub mod state;

pub use admission::Admission;
pub use circuit_breaker::CircuitBreaker;
pub use state::{CircuitSnapshot, CircuitState};

use crate::types::Priority;

/// 由操作类别与优先级组成端点名
pub fn endpoint_name(operation: &str, priority: Priority) -> String {
    format!("{}@{}", operation, priority.as_str())
}
