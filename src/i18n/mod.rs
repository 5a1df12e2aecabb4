//! 多语言错误消息模块
//!
//! 使用rat_embed_lang框架提供统一的错误消息多语言支持

use rat_embed_lang::register_translations;
use std::collections::HashMap;

/// 错误消息翻译注册器
pub struct ErrorMessageI18n;

impl ErrorMessageI18n {
    /// 注册单条翻译
    fn insert(
        translations: &mut HashMap<String, HashMap<String, String>>,
        key: &str,
        zh: &str,
        en: &str,
        ja: &str,
    ) {
        let mut messages = HashMap::new();
        messages.insert("zh-CN".to_string(), zh.to_string());
        messages.insert("en-US".to_string(), en.to_string());
        messages.insert("ja-JP".to_string(), ja.to_string());
        translations.insert(key.to_string(), messages);
    }

    /// 注册所有错误消息翻译
    pub fn register_all_translations() {
        let mut translations = HashMap::new();

        // 熔断拒绝
        Self::insert(
            &mut translations,
            "error.unavailable",
            "端点 '{endpoint}' 暂时不可用（熔断器已打开），请稍后重试",
            "Endpoint '{endpoint}' is temporarily unavailable (circuit open), retry later",
            "エンドポイント '{endpoint}' は一時的に利用できません（サーキットオープン）",
        );

        // 获取连接超时
        Self::insert(
            &mut translations,
            "error.acquisition_timeout",
            "在 {timeout_ms}ms 内未能获取数据库连接，连接池已耗尽",
            "Failed to acquire a database connection within {timeout_ms}ms, pool exhausted",
            "{timeout_ms}ms 以内にデータベース接続を取得できませんでした",
        );

        // 执行超时
        Self::insert(
            &mut translations,
            "error.timeout",
            "操作在 {timeout_ms}ms 内未完成",
            "Operation did not complete within {timeout_ms}ms",
            "操作が {timeout_ms}ms 以内に完了しませんでした",
        );

        // 执行错误
        Self::insert(
            &mut translations,
            "error.execution",
            "查询执行失败: {message}",
            "Query execution failed: {message}",
            "クエリ実行が失敗しました: {message}",
        );

        // 连接错误
        Self::insert(
            &mut translations,
            "error.connection",
            "数据库连接失败: {message}",
            "Database connection failed: {message}",
            "データベース接続に失敗しました: {message}",
        );

        // 连接泄漏
        Self::insert(
            &mut translations,
            "error.leak_detected",
            "检测到连接泄漏: {connection}",
            "Connection leak detected: {connection}",
            "接続リークを検出しました: {connection}",
        );

        // 扩缩容失败
        Self::insert(
            &mut translations,
            "error.scaling",
            "连接池扩缩容失败: {message}",
            "Connection pool scaling failed: {message}",
            "接続プールのスケーリングに失敗しました: {message}",
        );

        // 运行模式切换
        Self::insert(
            &mut translations,
            "error.mode_transition",
            "不允许从 {from} 模式切换到 {to} 模式",
            "Transition from {from} mode to {to} mode is not allowed",
            "{from} モードから {to} モードへの切り替えは許可されていません",
        );

        // 配置错误
        Self::insert(
            &mut translations,
            "error.config",
            "配置错误: {message}",
            "Configuration error: {message}",
            "設定エラー: {message}",
        );

        // 参数校验错误
        Self::insert(
            &mut translations,
            "error.validation",
            "参数校验失败: {field} - {message}",
            "Validation failed: {field} - {message}",
            "検証が失敗しました: {field} - {message}",
        );

        // 序列化错误
        Self::insert(
            &mut translations,
            "error.serialization",
            "数据序列化失败: {message}",
            "Data serialization failed: {message}",
            "データシリアライズが失敗しました: {message}",
        );

        // 注册所有翻译
        register_translations(translations);
    }

    /// 初始化错误消息多语言支持
    pub fn init() {
        Self::register_all_translations();

        // 从环境变量获取语言设置，默认为zh-CN
        let lang = std::env::var("RAT_LANG")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_else(|_| "zh-CN".to_string());

        // 标准化语言代码
        use rat_embed_lang::normalize_language_code;
        let normalized_lang = normalize_language_code(&lang);
        set_language(&normalized_lang);
    }
}

/// 重新导出rat_embed_lang的核心函数
pub use rat_embed_lang::{current_language, set_language, t, tf};
