//! Duo Chat Core 公共库
//!
//! 提供统一的配置加载、错误分类、日志初始化与通用工具

pub mod config;
pub mod error;
pub mod tracing;
pub mod utils;

pub use config::{
    ConfigManager, DisplayConfig, DuoChatConfig, GateConfig, LogBackend, LoggingConfig,
    MediaBackend, MediaConfig, MessageLogConfig, RecordingConfig, SessionConfig, app_config,
    load_config, load_config_from_source, load_config_from_str, load_config_with_environment,
};
pub use error::{ChatError, ErrorCode, InfraResultExt, Result};
pub use utils::*;
