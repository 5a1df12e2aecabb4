use serde::{Deserialize, Serialize};
use std::fmt;

/// 全局运行模式
///
/// 切换规则：
/// - `Normal` ⇄ `HighPerformance`、`Normal` ⇄ `ResourceSaver`、`Normal` ⇄ `Maintenance`
/// - 任意模式 → `Emergency`
/// - `Emergency` → `Normal` 只能由运维显式触发，不会自动降级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// 正常模式
    Normal,
    /// 高性能模式
    HighPerformance,
    /// 资源节约模式
    ResourceSaver,
    /// 紧急模式
    Emergency,
    /// 维护模式
    Maintenance,
}

/// 运行模式对应的调优参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeProfile {
    /// 允许的最大连接池（引擎）数量
    pub max_engines: usize,
    /// 调度器并发系数（相对基础并发数）
    pub concurrency_factor: f64,
    /// 批处理分组之间的间隔（毫秒）
    pub batch_window_ms: u64,
    /// 是否执行非关键后台任务（优化器、自动扩缩容）
    pub background_work: bool,
    /// 是否削减低优先级请求
    pub shed_low_priority: bool,
}

impl OperationMode {
    /// 获取运行模式的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Normal => "normal",
            OperationMode::HighPerformance => "high_performance",
            OperationMode::ResourceSaver => "resource_saver",
            OperationMode::Emergency => "emergency",
            OperationMode::Maintenance => "maintenance",
        }
    }

    /// 从字符串解析运行模式
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Some(OperationMode::Normal),
            "high_performance" | "high-performance" => Some(OperationMode::HighPerformance),
            "resource_saver" | "resource-saver" => Some(OperationMode::ResourceSaver),
            "emergency" => Some(OperationMode::Emergency),
            "maintenance" => Some(OperationMode::Maintenance),
            _ => None,
        }
    }

    /// 判断是否允许切换到目标模式
    pub fn can_transition_to(&self, target: OperationMode) -> bool {
        use OperationMode::*;

        if *self == target {
            return true;
        }

        match (*self, target) {
            (_, Emergency) => true,
            (Emergency, Normal) => true,
            (Normal, HighPerformance) | (HighPerformance, Normal) => true,
            (Normal, ResourceSaver) | (ResourceSaver, Normal) => true,
            (Normal, Maintenance) | (Maintenance, Normal) => true,
            _ => false,
        }
    }

    /// 获取模式对应的调优参数
    pub fn profile(&self) -> ModeProfile {
        match self {
            OperationMode::Normal => ModeProfile {
                max_engines: 5,
                concurrency_factor: 1.0,
                batch_window_ms: 0,
                background_work: true,
                shed_low_priority: false,
            },
            OperationMode::HighPerformance => ModeProfile {
                max_engines: 5,
                concurrency_factor: 2.0,
                batch_window_ms: 0,
                background_work: true,
                shed_low_priority: false,
            },
            OperationMode::ResourceSaver => ModeProfile {
                max_engines: 2,
                concurrency_factor: 0.5,
                batch_window_ms: 50,
                background_work: true,
                shed_low_priority: false,
            },
            OperationMode::Emergency => ModeProfile {
                max_engines: 5,
                concurrency_factor: 0.5,
                batch_window_ms: 100,
                background_work: false,
                shed_low_priority: true,
            },
            OperationMode::Maintenance => ModeProfile {
                max_engines: 1,
                concurrency_factor: 0.5,
                batch_window_ms: 100,
                background_work: false,
                shed_low_priority: false,
            },
        }
    }
}

impl Default for OperationMode {
    fn default() -> Self {
        OperationMode::Normal
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_transitions() {
        use OperationMode::*;

        assert!(Normal.can_transition_to(HighPerformance));
        assert!(HighPerformance.can_transition_to(Normal));
        assert!(Normal.can_transition_to(ResourceSaver));
        assert!(ResourceSaver.can_transition_to(Normal));

        // 任意模式都可以进入紧急模式
        for mode in [Normal, HighPerformance, ResourceSaver, Maintenance] {
            assert!(mode.can_transition_to(Emergency));
        }

        // 紧急模式只能回到正常模式
        assert!(Emergency.can_transition_to(Normal));
        assert!(!Emergency.can_transition_to(HighPerformance));
        assert!(!Emergency.can_transition_to(ResourceSaver));

        // 非正常模式之间不能直接切换
        assert!(!HighPerformance.can_transition_to(ResourceSaver));
        assert!(!ResourceSaver.can_transition_to(HighPerformance));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(OperationMode::from_str("high-performance"), Some(OperationMode::HighPerformance));
        assert_eq!(OperationMode::from_str("EMERGENCY"), Some(OperationMode::Emergency));
        assert_eq!(OperationMode::from_str("turbo"), None);
        assert_eq!(OperationMode::ResourceSaver.to_string(), "resource_saver");
    }
}
