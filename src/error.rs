//! Duo Chat Core 错误模块
//!
//! - 统一定义核心管道对外暴露的错误分类
//! - 为基础设施层提供便捷的错误转换工具

use std::fmt;

use thiserror::Error;

/// 稳定的错误码，供界面层区分提示文案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    EmptyInput,
    SendInFlight,
    UploadFailed,
    StoreUnavailable,
    LogUnavailable,
    DeviceUnavailable,
    DecodeSkip,
    AccessDenied,
    Config,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EmptyInput => "EMPTY_INPUT",
            ErrorCode::SendInFlight => "SEND_IN_FLIGHT",
            ErrorCode::UploadFailed => "UPLOAD_FAILED",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::LogUnavailable => "LOG_UNAVAILABLE",
            ErrorCode::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            ErrorCode::DecodeSkip => "DECODE_SKIP",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 聊天核心错误类型
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// 本地校验失败（不会触达网络）
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// 同一输入框已有发送在途
    #[error("a send is already in flight")]
    SendInFlight,

    /// 附件上传失败，消息不会被追加
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// 附件存储不可用
    #[error("attachment store unavailable: {0}")]
    StoreUnavailable(String),

    /// 消息日志不可用（追加或订阅）
    #[error("message log unavailable: {0}")]
    LogUnavailable(String),

    /// 麦克风无法获取或录音中途失效
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// 日志中的畸形记录，仅用于内部诊断
    #[error("malformed record {key}: {reason}")]
    DecodeSkip { key: String, reason: String },

    /// 口令错误
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// 内部错误
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::EmptyInput(_) => ErrorCode::EmptyInput,
            ChatError::SendInFlight => ErrorCode::SendInFlight,
            ChatError::UploadFailed(_) => ErrorCode::UploadFailed,
            ChatError::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            ChatError::LogUnavailable(_) => ErrorCode::LogUnavailable,
            ChatError::DeviceUnavailable(_) => ErrorCode::DeviceUnavailable,
            ChatError::DecodeSkip { .. } => ErrorCode::DecodeSkip,
            ChatError::AccessDenied(_) => ErrorCode::AccessDenied,
            ChatError::Config(_) => ErrorCode::Config,
            ChatError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// 是否为传输层错误（需要向用户发出一次性提示）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChatError::UploadFailed(_)
                | ChatError::StoreUnavailable(_)
                | ChatError::LogUnavailable(_)
                | ChatError::DeviceUnavailable(_)
        )
    }

    /// 是否为本地校验错误（只在输入框内处理）
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyInput(_) | ChatError::SendInFlight | ChatError::AccessDenied(_)
        )
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

/// 将基础设施层的 anyhow 错误映射为指定分类
pub trait InfraResultExt<T> {
    fn into_chat(self, wrap: fn(String) -> ChatError) -> Result<T>;
}

impl<T> InfraResultExt<T> for anyhow::Result<T> {
    fn into_chat(self, wrap: fn(String) -> ChatError) -> Result<T> {
        self.map_err(|err| wrap(format!("{err:#}")))
    }
}

/// 便捷宏：将基础设施错误映射为指定分类并提前返回
#[macro_export]
macro_rules! bail_infra {
    ($wrap:path, $($arg:tt)*) => {
        return Err($wrap(format!($($arg)*)))
    };
}
