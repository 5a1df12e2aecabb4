use serde::{Deserialize, Serialize};
use std::fmt;

/// 请求优先级
///
/// `Critical` 请求总是路由到主连接池，并绕过调度器并发上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// 低优先级（紧急模式下会被削减）
    Low,
    /// 普通优先级
    Normal,
    /// 高优先级
    High,
    /// 关键优先级
    Critical,
}

impl Priority {
    /// 获取优先级的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// 从字符串解析优先级
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// 是否为关键请求
    pub fn is_critical(&self) -> bool {
        matches!(self, Priority::Critical)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
