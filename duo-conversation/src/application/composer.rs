use std::sync::atomic::{AtomicBool, Ordering};

use duo_chat_core::{ChatError, Result};
use duo_media::{AttachmentStoreRef, UploadRequest};
use duo_message_log::{AppendReceipt, MessageLogRef, MessageRecord};
use tracing::{debug, instrument, warn};

/// 在途标记守卫，离开作用域时复位（成功、失败或被取消）
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 消息编排
///
/// 把用户意图转换为日志追加；附件先上传，上传成功后才追加，
/// 顺序完全由日志在提交时分配的时间戳决定
pub struct CompositionController {
    log: MessageLogRef,
    store: AttachmentStoreRef,
    text_in_flight: AtomicBool,
}

impl CompositionController {
    pub fn new(log: MessageLogRef, store: AttachmentStoreRef) -> Self {
        Self {
            log,
            store,
            text_in_flight: AtomicBool::new(false),
        }
    }

    /// 是否有文本发送在途
    pub fn is_sending(&self) -> bool {
        self.text_in_flight.load(Ordering::Acquire)
    }

    /// 发送文本
    ///
    /// 去除首尾空白后为空返回 `EmptyInput`，不会触达网络；
    /// 上一次发送尚未完成时返回 `SendInFlight`
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn send_text(&self, sender: &str, text: &str) -> Result<AppendReceipt> {
        let sender = validate_sender(sender)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyInput("message text is empty".to_string()));
        }

        let Some(_guard) = InFlightGuard::acquire(&self.text_in_flight) else {
            debug!("文本发送在途，忽略重复提交");
            return Err(ChatError::SendInFlight);
        };

        let receipt = self
            .log
            .append(&MessageRecord::text(sender, text))
            .await
            .inspect_err(|err| warn!(error = %err, "文本消息追加失败"))?;
        debug!(id = %receipt.id, timestamp = receipt.timestamp, "文本消息已发送");
        Ok(receipt)
    }

    /// 发送附件
    ///
    /// 上传失败返回 `UploadFailed` 且不会追加任何记录
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    pub async fn send_attachment(
        &self,
        sender: &str,
        file_name: &str,
        content_type: &str,
        payload: &[u8],
    ) -> Result<AppendReceipt> {
        let sender = validate_sender(sender)?;
        if payload.is_empty() {
            return Err(ChatError::EmptyInput("attachment payload is empty".to_string()));
        }

        let request = UploadRequest::new(file_name, content_type, payload);
        let stored = self.store.upload(&request).await.map_err(|err| {
            warn!(error = %err, backend = self.store.backend(), "附件上传失败，不追加消息");
            match err {
                ChatError::UploadFailed(reason) | ChatError::StoreUnavailable(reason) => {
                    ChatError::UploadFailed(reason)
                }
                other => ChatError::UploadFailed(other.to_string()),
            }
        })?;

        // 媒体类别以调用方声明的内容类型为准
        let record = MessageRecord::attachment(sender, stored.url, content_type);
        let receipt = self
            .log
            .append(&record)
            .await
            .inspect_err(|err| warn!(error = %err, "附件消息追加失败"))?;
        debug!(
            id = %receipt.id,
            kind = %request.media_kind(),
            "附件消息已发送"
        );
        Ok(receipt)
    }
}

fn validate_sender(sender: &str) -> Result<&str> {
    if sender.trim().is_empty() {
        return Err(ChatError::EmptyInput("sender is empty".to_string()));
    }
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use duo_media::InMemoryAttachmentStore;
    use duo_message_log::InMemoryMessageLog;

    fn controller() -> (
        CompositionController,
        InMemoryMessageLog,
        InMemoryAttachmentStore,
    ) {
        let log = InMemoryMessageLog::new();
        let store = InMemoryAttachmentStore::new("uploads");
        let controller =
            CompositionController::new(Arc::new(log.clone()), Arc::new(store.clone()));
        (controller, log, store)
    }

    #[tokio::test]
    async fn test_blank_text_never_appends() {
        let (controller, log, _) = controller();
        for text in ["", "   ", "\n\t"] {
            let err = controller.send_text("A", text).await.unwrap_err();
            assert!(matches!(err, ChatError::EmptyInput(_)));
        }
        assert!(log.is_empty().await);
        assert!(!controller.is_sending());
    }

    #[tokio::test]
    async fn test_text_is_trimmed() {
        let (controller, log, _) = controller();
        controller.send_text("A", "  hello  ").await.unwrap();
        let entries = log.entries().await;
        assert_eq!(entries[0].value["text"], "hello");
        assert_eq!(entries[0].value["fileUrl"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_blank_sender_rejected() {
        let (controller, log, _) = controller();
        assert!(controller.send_text(" ", "hi").await.is_err());
        assert!(controller.send_attachment("", "a.png", "image/png", b"x").await.is_err());
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_attachment_upload_then_append() {
        let (controller, log, store) = controller();
        controller
            .send_attachment("B", "cat.png", "image/png", b"png")
            .await
            .unwrap();

        let entries = log.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value["text"], "");
        assert_eq!(entries[0].value["fileType"], "image/png");
        let url = entries[0].value["fileUrl"].as_str().unwrap();
        assert!(store.get(url).await.is_some());
    }

    #[tokio::test]
    async fn test_failed_upload_never_appends() {
        let (controller, log, store) = controller();
        store.set_unavailable(true);
        let err = controller
            .send_attachment("B", "cat.png", "image/png", b"png")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UploadFailed(_)));
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_payload_rejected_locally() {
        let (controller, log, store) = controller();
        let err = controller
            .send_attachment("B", "empty.bin", "application/octet-stream", b"")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyInput(_)));
        assert!(store.is_empty().await);
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_log_failure_resets_in_flight_flag() {
        let (controller, log, _) = controller();
        log.set_unavailable(true).await;
        let err = controller.send_text("A", "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::LogUnavailable(_)));
        assert!(!controller.is_sending());

        log.set_unavailable(false).await;
        controller.send_text("A", "hi").await.unwrap();
        assert_eq!(log.len().await, 1);
    }
}
