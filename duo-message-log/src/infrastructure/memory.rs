use std::sync::Arc;

use duo_chat_core::{ChatError, Result, current_millis};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};
use ulid::{Generator, Ulid};

use crate::domain::model::{AppendReceipt, LogSnapshot, MessageRecord, RawEntry};
use crate::domain::repository::{MessageLog, SnapshotStream};

struct Subscriber {
    limit: usize,
    tx: mpsc::UnboundedSender<Result<LogSnapshot>>,
}

struct Inner {
    entries: Vec<RawEntry>,
    last_timestamp: i64,
    keys: Generator,
    subscribers: Vec<Subscriber>,
    unavailable: bool,
}

impl Inner {
    fn next_key(&mut self) -> String {
        self.keys
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }

    /// 服务端时间戳，保证不回退
    fn next_timestamp(&mut self) -> i64 {
        let ts = current_millis().max(self.last_timestamp);
        self.last_timestamp = ts;
        ts
    }

    fn publish(&mut self) {
        let entries = &self.entries;
        self.subscribers.retain(|sub| {
            sub.tx
                .send(Ok(LogSnapshot::last_n(entries, sub.limit)))
                .is_ok()
        });
    }
}

/// 内存消息日志
///
/// 与真实后端语义一致：提交时分配 id 与时间戳，每次变化向所有订阅者推送最近 N 条的完整快照
#[derive(Clone)]
pub struct InMemoryMessageLog {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryMessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: Vec::new(),
                last_timestamp: 0,
                keys: Generator::new(),
                subscribers: Vec::new(),
                unavailable: false,
            })),
        }
    }

    /// 直接写入一条原始条目（可以是任意 JSON，用于模拟脏数据或其他客户端写入）
    pub async fn insert_raw(&self, key: impl Into<String>, value: Value) {
        let mut inner = self.inner.lock().await;
        inner.entries.push(RawEntry::new(key, value));
        inner.publish();
    }

    /// 模拟传输层不可用：追加与订阅都会失败
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    /// 向所有订阅者推送一次订阅级错误（订阅保持存活）
    pub async fn fail_subscribers(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|sub| {
            sub.tx
                .send(Err(ChatError::LogUnavailable(reason.to_string())))
                .is_ok()
        });
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// 当前存活的订阅数量
    pub async fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        inner.subscribers.len()
    }

    pub async fn entries(&self) -> Vec<RawEntry> {
        self.inner.lock().await.entries.clone()
    }
}

#[async_trait::async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(&self, record: &MessageRecord) -> Result<AppendReceipt> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable {
            warn!(sender = %record.sender, "消息日志不可用，追加失败");
            return Err(ChatError::LogUnavailable(
                "in-memory log marked unavailable".to_string(),
            ));
        }

        let id = inner.next_key();
        let timestamp = inner.next_timestamp();
        inner
            .entries
            .push(RawEntry::new(id.clone(), record.to_wire(json!(timestamp))));
        debug!(id = %id, timestamp, "消息已追加");
        inner.publish();

        Ok(AppendReceipt { id, timestamp })
    }

    async fn subscribe(&self, limit: usize) -> Result<SnapshotStream> {
        let mut inner = self.inner.lock().await;
        if inner.unavailable {
            return Err(ChatError::LogUnavailable(
                "in-memory log marked unavailable".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // 订阅建立后立即推送当前窗口
        let _ = tx.send(Ok(LogSnapshot::last_n(&inner.entries, limit)));
        inner.subscribers.push(Subscriber { limit, tx });
        debug!(limit, "新增消息日志订阅");
        Ok(rx)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_assigns_unique_ids_and_monotonic_timestamps() {
        let log = InMemoryMessageLog::new();
        let a = log.append(&MessageRecord::text("A", "one")).await.unwrap();
        let b = log.append(&MessageRecord::text("B", "two")).await.unwrap();

        assert_ne!(a.id, b.id);
        assert!(b.timestamp >= a.timestamp);
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_and_full_snapshots() {
        let log = InMemoryMessageLog::new();
        log.append(&MessageRecord::text("A", "one")).await.unwrap();

        let mut rx = log.subscribe(100).await.unwrap();
        let initial = rx.recv().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);

        log.append(&MessageRecord::text("B", "two")).await.unwrap();
        let next = rx.recv().await.unwrap().unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(next.entries[1].value["text"], "two");
    }

    #[tokio::test]
    async fn test_subscription_window_is_bounded() {
        let log = InMemoryMessageLog::new();
        for i in 0..5 {
            log.append(&MessageRecord::text("A", format!("m{i}")))
                .await
                .unwrap();
        }
        let mut rx = log.subscribe(3).await.unwrap();
        let snapshot = rx.recv().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.entries[0].value["text"], "m2");
    }

    #[tokio::test]
    async fn test_dropped_receiver_releases_subscription() {
        let log = InMemoryMessageLog::new();
        let rx = log.subscribe(10).await.unwrap();
        assert_eq!(log.subscriber_count().await, 1);
        drop(rx);
        assert_eq!(log.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_log_rejects_append() {
        let log = InMemoryMessageLog::new();
        log.set_unavailable(true).await;
        let err = log
            .append(&MessageRecord::text("A", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::LogUnavailable(_)));
        assert!(log.is_empty().await);
        assert!(log.subscribe(10).await.is_err());
    }
}
