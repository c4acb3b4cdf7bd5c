use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use duo_chat_core::{ChatError, Result, build_object_key, current_millis};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::model::{StoredAttachment, UploadRequest};
use crate::domain::repository::AttachmentStore;

#[derive(Debug, Clone)]
struct StoredObject {
    content_type: String,
    payload: Vec<u8>,
}

/// 内存附件存储，地址形如 `memory://{object_key}`
#[derive(Clone, Default)]
pub struct InMemoryAttachmentStore {
    prefix: String,
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    fail_uploads: Arc<AtomicBool>,
}

impl InMemoryAttachmentStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// 按地址读取已存储的负载
    pub async fn get(&self, url: &str) -> Option<(String, Vec<u8>)> {
        let key = url.strip_prefix("memory://")?;
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|obj| (obj.content_type.clone(), obj.payload.clone()))
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// 模拟存储不可用（之后的上传全部失败）
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_uploads.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AttachmentStore for InMemoryAttachmentStore {
    async fn upload(&self, request: &UploadRequest<'_>) -> Result<StoredAttachment> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ChatError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }

        let object_key = build_object_key(&self.prefix, current_millis(), request.file_name);
        let mut objects = self.objects.write().await;
        objects.insert(
            object_key.clone(),
            StoredObject {
                content_type: request.content_type.to_string(),
                payload: request.payload.to_vec(),
            },
        );
        debug!(object_key = %object_key, size = request.payload.len(), "附件已写入内存存储");

        Ok(StoredAttachment {
            url: format!("memory://{}", object_key),
            content_type: request.content_type.to_string(),
            object_key,
            size: request.payload.len() as u64,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MediaKind;

    #[tokio::test]
    async fn test_upload_and_read_back() {
        let store = InMemoryAttachmentStore::new("uploads");
        let stored = store
            .upload(&UploadRequest::new("cat.png", "image/png", b"png-bytes"))
            .await
            .unwrap();

        assert!(stored.url.starts_with("memory://uploads/"));
        assert_eq!(stored.media_kind(), MediaKind::Image);
        assert_eq!(stored.size, 9);

        let (content_type, payload) = store.get(&stored.url).await.unwrap();
        assert_eq!(content_type, "image/png");
        assert_eq!(payload, b"png-bytes");
    }

    #[tokio::test]
    async fn test_same_name_does_not_overwrite() {
        let store = InMemoryAttachmentStore::new("uploads");
        let a = store
            .upload(&UploadRequest::new("a.txt", "text/plain", b"one"))
            .await
            .unwrap();
        let b = store
            .upload(&UploadRequest::new("a.txt", "text/plain", b"two"))
            .await
            .unwrap();

        assert_ne!(a.url, b.url);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_transport_error() {
        let store = InMemoryAttachmentStore::new("uploads");
        store.set_unavailable(true);
        let err = store
            .upload(&UploadRequest::new("a.txt", "text/plain", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::StoreUnavailable(_)));
        assert!(store.is_empty().await);
    }
}
