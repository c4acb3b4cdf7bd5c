//! 只追加的消息日志
//!
//! 服务端为每条记录分配 id 与时间戳，并以完整快照的形式推送最近 N 条记录

pub mod domain;
pub mod infrastructure;
pub mod service;

pub use domain::model::{AppendReceipt, LogSnapshot, MessageRecord, RawEntry};
pub use domain::repository::{MessageLog, MessageLogRef, SnapshotStream};
pub use infrastructure::file::jsonl::FileMessageLog;
pub use infrastructure::firebase::realtime::FirebaseMessageLog;
pub use infrastructure::memory::InMemoryMessageLog;
pub use service::wire::build_message_log;
