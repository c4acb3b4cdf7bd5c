//! # 日志初始化模块
//!
//! 为嵌入方（界面层）提供统一的 tracing 日志初始化。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置构建日志过滤器
///
/// 优先使用环境变量 RUST_LOG，如果没有则使用配置文件的日志级别
fn build_env_filter(logging_config: Option<&LoggingConfig>) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level_str = logging_config.map(|c| c.level.as_str()).unwrap_or("info");
            EnvFilter::new(level_str)
        }
    }
}

/// 从配置初始化日志系统
///
/// # 参数
/// * `logging_config` - 日志配置（可选），如果为 None 则使用默认配置（info 级别）
///
/// # 示例
/// ```rust,ignore
/// use duo_chat_core::config::LoggingConfig;
///
/// // 使用默认配置
/// init_tracing_from_config(None);
///
/// // 使用自定义配置
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     with_target: false,
///     with_thread_ids: true,
///     with_file: true,
///     with_line_number: true,
/// };
/// init_tracing_from_config(Some(&config));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    if let Err(err) = try_init_tracing(logging_config) {
        eprintln!("tracing subscriber already initialised: {err}");
    }
}

/// 初始化日志系统，已初始化时返回错误而不是 panic（测试中可重复调用）
pub fn try_init_tracing(
    logging_config: Option<&LoggingConfig>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = build_env_filter(logging_config);

    // 获取日志配置（如果未提供则使用默认配置）
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_does_not_panic() {
        let _ = try_init_tracing(None);
        assert!(try_init_tracing(None).is_err());
        init_tracing_from_config(Some(&LoggingConfig::default()));
    }
}
