use duo_chat_core::{ChatError, ErrorCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use duo_media::MediaKind;

/// 消息附件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub media_kind: MediaKind,
    /// 上传时声明的内容类型（线上 `fileType`）
    pub content_type: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        Self {
            url: url.into(),
            media_kind: MediaKind::from_content_type(&content_type),
            content_type,
        }
    }
}

/// 聊天消息
///
/// 文本与附件至少有其一。`id` 与 `timestamp` 在持久化之前为空，
/// 由消息日志在提交时一并分配，之后不再变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Option<String>,
    pub sender: String,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub timestamp: Option<i64>,
}

impl Message {
    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment.is_some()
    }
}

/// 渲染用的消息条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub message: Message,
    /// 是否为当前用户发送
    pub is_own: bool,
    /// `HH:MM`（显示时区）
    pub time_label: String,
}

/// 登录会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub name: String,
    pub is_authenticated: bool,
}

impl UserSession {
    pub fn authenticated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_authenticated: true,
        }
    }
}

/// 面向界面层的一次性通知（只承载传输类错误）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatNotice {
    pub code: ErrorCode,
    pub message: String,
}

impl ChatNotice {
    /// 校验类错误留在本地，不生成通知
    pub fn from_error(err: &ChatError) -> Option<Self> {
        err.is_transport().then(|| Self {
            code: err.code(),
            message: err.to_string(),
        })
    }
}

pub type NoticeSender = mpsc::UnboundedSender<ChatNotice>;
pub type NoticeReceiver = mpsc::UnboundedReceiver<ChatNotice>;
