use std::sync::Arc;

use chrono_tz::Tz;
use duo_chat_core::{ChatError, DuoChatConfig, Result, format_time_label};
use duo_media::AttachmentStoreRef;
use duo_message_log::{AppendReceipt, MessageLogRef};
use tokio::sync::mpsc;

use crate::application::composer::CompositionController;
use crate::application::feed::{FeedProjector, FeedSubscription};
use crate::application::recording::{RecordingPhase, RecordingSession, StopOutcome};
use crate::domain::model::{
    ChatNotice, FeedEntry, Message, NoticeReceiver, NoticeSender, UserSession,
};
use crate::domain::repository::CaptureDeviceRef;

/// 聊天客户端门面
///
/// 绑定当前登录用户，组合消息流投影、消息编排与录音会话；
/// 传输类错误除了作为返回值外，还会向通知通道发送一次
pub struct ChatClient {
    session: UserSession,
    composer: Arc<CompositionController>,
    projector: FeedProjector,
    recorder: RecordingSession,
    notices: NoticeSender,
    timezone: Tz,
}

impl ChatClient {
    pub fn new(
        session: UserSession,
        log: MessageLogRef,
        store: AttachmentStoreRef,
        device: CaptureDeviceRef,
        config: &DuoChatConfig,
    ) -> (Self, NoticeReceiver) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let composer = Arc::new(CompositionController::new(log.clone(), store));
        let projector = FeedProjector::new(log, config.message_log.effective_window());
        let recorder = RecordingSession::new(
            device,
            composer.clone(),
            session.name.clone(),
            config.recording.clone(),
            notices.clone(),
        );

        let client = Self {
            session,
            composer,
            projector,
            recorder,
            notices,
            timezone: config.display.tz(),
        };
        (client, notice_rx)
    }

    pub fn user(&self) -> &UserSession {
        &self.session
    }

    fn notify<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if let Some(notice) = ChatNotice::from_error(err) {
                let _ = self.notices.send(notice);
            }
        }
        result
    }

    pub async fn send_text(&self, text: &str) -> Result<AppendReceipt> {
        let result = self.composer.send_text(&self.session.name, text).await;
        self.notify(result)
    }

    pub async fn send_file(
        &self,
        file_name: &str,
        content_type: &str,
        payload: &[u8],
    ) -> Result<AppendReceipt> {
        let result = self
            .composer
            .send_attachment(&self.session.name, file_name, content_type, payload)
            .await;
        self.notify(result)
    }

    pub async fn start_recording(&self) -> Result<()> {
        let result = self.recorder.start().await;
        self.notify(result)
    }

    pub async fn stop_recording(&self) -> Result<StopOutcome> {
        let result = self.recorder.stop().await;
        self.notify(result)
    }

    pub async fn cancel_recording(&self) -> bool {
        self.recorder.cancel().await
    }

    pub async fn recording_phase(&self) -> RecordingPhase {
        self.recorder.phase().await
    }

    pub async fn recording_elapsed_seconds(&self) -> u64 {
        self.recorder.elapsed_seconds().await
    }

    /// 订阅渲染用的消息流；订阅错误发送到通知通道
    pub async fn subscribe_feed<F>(&self, mut on_update: F) -> FeedSubscription
    where
        F: FnMut(Vec<FeedEntry>) + Send + 'static,
    {
        let me = self.session.name.clone();
        let timezone = self.timezone;
        let notices = self.notices.clone();
        self.projector
            .subscribe(
                move |messages: &[Message]| on_update(to_entries(messages, &me, &timezone)),
                move |err: &ChatError| {
                    if let Some(notice) = ChatNotice::from_error(err) {
                        let _ = notices.send(notice);
                    }
                },
            )
            .await
    }

    /// 最近一次成功投影的消息流
    pub fn feed_entries(&self) -> Vec<FeedEntry> {
        to_entries(&self.projector.latest(), &self.session.name, &self.timezone)
    }
}

fn to_entries(messages: &[Message], me: &str, timezone: &Tz) -> Vec<FeedEntry> {
    messages
        .iter()
        .map(|message| FeedEntry {
            is_own: message.sender == me,
            time_label: message
                .timestamp
                .map(|ts| format_time_label(ts, timezone))
                .unwrap_or_default(),
            message: message.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, ts: i64) -> Message {
        Message {
            id: Some(format!("{sender}-{ts}")),
            sender: sender.to_string(),
            text: "hi".to_string(),
            attachment: None,
            timestamp: Some(ts),
        }
    }

    #[test]
    fn test_entries_mark_own_messages_and_format_time() {
        // 2024-01-01T10:05:00Z
        let entries = to_entries(
            &[message("Alice", 1_704_103_500_000), message("Bob", 1_704_103_500_000)],
            "Alice",
            &chrono_tz::UTC,
        );
        assert!(entries[0].is_own);
        assert!(!entries[1].is_own);
        assert_eq!(entries[0].time_label, "10:05");
    }
}
