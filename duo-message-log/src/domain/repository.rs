use std::sync::Arc;

use duo_chat_core::Result;
use tokio::sync::mpsc;

use crate::domain::model::{AppendReceipt, LogSnapshot, MessageRecord};

/// 实时订阅流：每次窗口变化推送一份完整快照；传输层失败以 `Err` 推送
pub type SnapshotStream = mpsc::UnboundedReceiver<Result<LogSnapshot>>;

/// 消息日志接口
#[async_trait::async_trait]
pub trait MessageLog: Send + Sync {
    /// 追加一条记录，失败时返回 `ChatError::LogUnavailable`，调用方不得假设已持久化
    async fn append(&self, record: &MessageRecord) -> Result<AppendReceipt>;

    /// 订阅最近 `limit` 条记录；丢弃返回的接收端即释放订阅
    async fn subscribe(&self, limit: usize) -> Result<SnapshotStream>;

    fn backend(&self) -> &'static str;
}

pub type MessageLogRef = Arc<dyn MessageLog>;
