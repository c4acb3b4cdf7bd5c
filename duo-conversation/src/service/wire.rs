//! Wire 风格的依赖注入模块
//!
//! 类似 Go 的 Wire 框架，按依赖顺序从配置构建聊天客户端

use std::sync::Arc;

use anyhow::{Context, Result};
use duo_chat_core::DuoChatConfig;
use duo_media::build_attachment_store;
use duo_message_log::build_message_log;
use tracing::info;

use crate::application::client::ChatClient;
use crate::application::gate::AccessGate;
use crate::domain::model::{NoticeReceiver, UserSession};
use crate::domain::repository::{CaptureDeviceRef, SessionStoreRef};
use crate::infrastructure::session::json_file::JsonFileSessionStore;
use crate::infrastructure::session::memory::InMemorySessionStore;

/// 构建访问门禁
///
/// 配置了 `session.store_path` 时会话写入 JSON 文件，否则只保存在内存中
pub fn build_access_gate(config: &DuoChatConfig) -> Result<AccessGate> {
    config.validate().context("Invalid configuration")?;

    let store: SessionStoreRef = match config.session.store_path.as_deref() {
        Some(path) => Arc::new(JsonFileSessionStore::new(path)),
        None => Arc::new(InMemorySessionStore::new()),
    };
    Ok(AccessGate::new(config.gate.passcode.clone(), store))
}

/// 构建聊天客户端
///
/// # 参数
/// * `config` - 应用配置
/// * `session` - 已通过门禁的登录会话
/// * `device` - 宿主提供的录音设备
///
/// # 返回
/// * `(ChatClient, NoticeReceiver)` - 客户端与通知接收端
pub fn build_client(
    config: &DuoChatConfig,
    session: UserSession,
    device: CaptureDeviceRef,
) -> Result<(ChatClient, NoticeReceiver)> {
    // 1. 校验配置
    config.validate().context("Invalid configuration")?;

    // 2. 构建消息日志
    let log = build_message_log(&config.message_log).context("Failed to build message log")?;

    // 3. 构建附件存储
    let store = build_attachment_store(&config.media).context("Failed to build attachment store")?;

    // 4. 组装客户端
    let (client, notices) = ChatClient::new(session, log, store, device, config);
    info!(user = %client.user().name, "聊天客户端已初始化");
    Ok((client, notices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::capture::channel::ChannelCaptureDevice;

    fn config() -> DuoChatConfig {
        let mut config = DuoChatConfig::default();
        config.gate.passcode = "1234".to_string();
        config
    }

    #[tokio::test]
    async fn test_build_client_from_defaults() {
        let (device, _feed) = ChannelCaptureDevice::new("audio/webm");
        let (client, _notices) =
            build_client(&config(), UserSession::authenticated("Alice"), Arc::new(device))
                .unwrap();
        assert_eq!(client.user().name, "Alice");
    }

    #[tokio::test]
    async fn test_build_gate_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.session.store_path = Some(dir.path().join("session.json").display().to_string());

        let gate = build_access_gate(&config).unwrap();
        gate.login("1234", "Bob").await.unwrap();
        assert!(dir.path().join("session.json").exists());
    }
}
