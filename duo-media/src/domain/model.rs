use std::fmt;

/// 附件媒体类别
///
/// 由上传时声明的内容类型推导：`image/` 前缀为图片，`audio/` 前缀为音频，其余为普通文件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Audio,
    Other,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Self {
        let normalized = content_type.trim().to_ascii_lowercase();
        if normalized.starts_with("image/") {
            MediaKind::Image
        } else if normalized.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Other => "other",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 上传请求
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    /// 原始文件名
    pub file_name: &'a str,
    /// 声明的内容类型
    pub content_type: &'a str,
    pub payload: &'a [u8],
}

impl<'a> UploadRequest<'a> {
    pub fn new(file_name: &'a str, content_type: &'a str, payload: &'a [u8]) -> Self {
        Self {
            file_name,
            content_type,
            payload,
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        MediaKind::from_content_type(self.content_type)
    }
}

/// 已持久化的附件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    /// 可公开访问的地址
    pub url: String,
    /// 存储端记录的内容类型
    pub content_type: String,
    /// 存储键（防冲突）
    pub object_key: String,
    pub size: u64,
}

impl StoredAttachment {
    pub fn media_kind(&self) -> MediaKind {
        MediaKind::from_content_type(&self.content_type)
    }
}
