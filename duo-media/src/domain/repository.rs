use std::sync::Arc;

use duo_chat_core::Result;

use crate::domain::model::{StoredAttachment, UploadRequest};

/// 附件存储接口
///
/// 同名冲突由存储实现负责避免；传输失败返回 `ChatError::StoreUnavailable`
#[async_trait::async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn upload(&self, request: &UploadRequest<'_>) -> Result<StoredAttachment>;

    /// 存储后端名称（用于日志）
    fn backend(&self) -> &'static str;
}

pub type AttachmentStoreRef = Arc<dyn AttachmentStore>;
