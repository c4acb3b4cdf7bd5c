//! 双人实时聊天会话核心
//!
//! - 消息流投影：订阅消息日志，把完整快照重新推导为按时间排序的消息序列
//! - 消息编排：文本与附件的发送流程（先上传，后追加）
//! - 录音会话：Idle / Capturing / Finalizing 状态机
//! - 访问门禁与会话持久化

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod service;

pub use application::client::ChatClient;
pub use application::composer::CompositionController;
pub use application::feed::{FeedProjector, FeedSubscription};
pub use application::gate::AccessGate;
pub use application::recording::{RecordingPhase, RecordingSession, StopOutcome};
pub use domain::model::{
    Attachment, ChatNotice, FeedEntry, MediaKind, Message, NoticeReceiver, NoticeSender,
    UserSession,
};
pub use domain::repository::{
    CaptureDevice, CaptureDeviceRef, CaptureLease, ChunkStream, DeviceHandle, SessionStore,
    SessionStoreRef,
};
pub use domain::service::projection::{decode_entry, project};
pub use infrastructure::capture::channel::{CaptureFeed, ChannelCaptureDevice};
pub use infrastructure::session::json_file::JsonFileSessionStore;
pub use infrastructure::session::memory::InMemorySessionStore;
pub use service::wire::{build_access_gate, build_client};
