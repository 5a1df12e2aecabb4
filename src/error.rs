//! 错误类型定义
//!
//! 弹性层对外只暴露少量类型化错误：熔断拒绝、获取连接超时、执行超时与执行失败。
//! 泄漏与扩缩容失败属于内部错误，只记录日志，不会传递给调用方。

use thiserror::Error;

/// 弹性层结果类型
pub type ShieldResult<T> = Result<T, ShieldError>;

/// 弹性层错误类型
#[derive(Error, Debug)]
pub enum ShieldError {
    /// 熔断器处于打开状态，请求被快速拒绝（未尝试建立连接）
    #[error("{message}")]
    Unavailable { endpoint: String, message: String },

    /// 在超时时间内未能从连接池获取连接
    #[error("{message}")]
    AcquisitionTimeout { timeout_ms: u64, message: String },

    /// 查询执行超时
    #[error("{message}")]
    Timeout { timeout_ms: u64, message: String },

    /// 后端存储拒绝了本次操作
    #[error("{message}")]
    ExecutionError { message: String },

    /// 建立连接失败
    #[error("{message}")]
    ConnectionError { message: String },

    /// 检测到连接泄漏（内部错误，自愈处理）
    #[error("{message}")]
    LeakDetected { connection: String, message: String },

    /// 扩缩容失败（内部错误，系统维持当前容量）
    #[error("{message}")]
    ScalingFailure { message: String },

    /// 非法的运行模式切换
    #[error("{message}")]
    InvalidModeTransition {
        from: String,
        to: String,
        message: String,
    },

    /// 配置错误
    #[error("{message}")]
    ConfigError { message: String },

    /// 参数校验错误
    #[error("{message}")]
    ValidationError { field: String, message: String },

    /// 序列化错误
    #[error("{message}")]
    SerializationError { message: String },

    /// IO 错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ShieldError {
    /// 是否为瞬时故障（超时、连接错误）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ShieldError::AcquisitionTimeout { .. }
                | ShieldError::Timeout { .. }
                | ShieldError::ConnectionError { .. }
        )
    }

    /// 是否为熔断拒绝
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ShieldError::Unavailable { .. })
    }

    /// 错误分类名称，用于状态报告与日志
    pub fn kind(&self) -> &'static str {
        match self {
            ShieldError::Unavailable { .. } => "unavailable",
            ShieldError::AcquisitionTimeout { .. } => "acquisition_timeout",
            ShieldError::Timeout { .. } => "timeout",
            ShieldError::ExecutionError { .. } => "execution_error",
            ShieldError::ConnectionError { .. } => "connection_error",
            ShieldError::LeakDetected { .. } => "leak_detected",
            ShieldError::ScalingFailure { .. } => "scaling_failure",
            ShieldError::InvalidModeTransition { .. } => "invalid_mode_transition",
            ShieldError::ConfigError { .. } => "config_error",
            ShieldError::ValidationError { .. } => "validation_error",
            ShieldError::SerializationError { .. } => "serialization_error",
            ShieldError::IoError(_) => "io_error",
            ShieldError::Other(_) => "other",
        }
    }
}

impl From<serde_json::Error> for ShieldError {
    fn from(e: serde_json::Error) -> Self {
        crate::shield_error!(serialization, e.to_string())
    }
}

/// 便捷错误构造宏，消息经过多语言系统本地化
#[macro_export]
macro_rules! shield_error {
    (unavailable, $endpoint:expr) => {{
        let endpoint: String = ($endpoint).to_string();
        $crate::error::ShieldError::Unavailable {
            message: $crate::i18n::tf("error.unavailable", &[("endpoint", endpoint.as_str())]),
            endpoint,
        }
    }};
    (acquisition_timeout, $timeout_ms:expr) => {{
        let timeout_ms: u64 = $timeout_ms;
        $crate::error::ShieldError::AcquisitionTimeout {
            timeout_ms,
            message: $crate::i18n::tf(
                "error.acquisition_timeout",
                &[("timeout_ms", timeout_ms.to_string().as_str())],
            ),
        }
    }};
    (timeout, $timeout_ms:expr) => {{
        let timeout_ms: u64 = $timeout_ms;
        $crate::error::ShieldError::Timeout {
            timeout_ms,
            message: $crate::i18n::tf("error.timeout", &[("timeout_ms", timeout_ms.to_string().as_str())]),
        }
    }};
    (execution, $msg:expr) => {
        $crate::error::ShieldError::ExecutionError {
            message: $crate::i18n::tf("error.execution", &[("message", ($msg).to_string().as_str())]),
        }
    };
    (connection, $msg:expr) => {
        $crate::error::ShieldError::ConnectionError {
            message: $crate::i18n::tf("error.connection", &[("message", ($msg).to_string().as_str())]),
        }
    };
    (leak, $connection:expr) => {{
        let connection: String = ($connection).to_string();
        $crate::error::ShieldError::LeakDetected {
            message: $crate::i18n::tf("error.leak_detected", &[("connection", connection.as_str())]),
            connection,
        }
    }};
    (scaling, $msg:expr) => {
        $crate::error::ShieldError::ScalingFailure {
            message: $crate::i18n::tf("error.scaling", &[("message", ($msg).to_string().as_str())]),
        }
    };
    (mode_transition, $from:expr, $to:expr) => {{
        let from: String = ($from).to_string();
        let to: String = ($to).to_string();
        $crate::error::ShieldError::InvalidModeTransition {
            message: $crate::i18n::tf(
                "error.mode_transition",
                &[("from", from.as_str()), ("to", to.as_str())],
            ),
            from,
            to,
        }
    }};
    (config, $msg:expr) => {
        $crate::error::ShieldError::ConfigError {
            message: $crate::i18n::tf("error.config", &[("message", ($msg).to_string().as_str())]),
        }
    };
    (validation, $field:expr, $msg:expr) => {{
        let field: String = ($field).to_string();
        $crate::error::ShieldError::ValidationError {
            message: $crate::i18n::tf(
                "error.validation",
                &[("field", field.as_str()), ("message", ($msg).to_string().as_str())],
            ),
            field,
        }
    }};
    (serialization, $msg:expr) => {
        $crate::error::ShieldError::SerializationError {
            message: $crate::i18n::tf("error.serialization", &[("message", ($msg).to_string().as_str())]),
        }
    };
}
