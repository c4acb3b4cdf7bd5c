//! Wire 风格的依赖注入模块
//!
//! 根据配置构建消息日志实现

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use duo_chat_core::{LogBackend, MessageLogConfig};
use tracing::info;

use crate::domain::repository::MessageLogRef;
use crate::infrastructure::file::jsonl::FileMessageLog;
use crate::infrastructure::firebase::realtime::FirebaseMessageLog;
use crate::infrastructure::memory::InMemoryMessageLog;

/// 构建消息日志
///
/// # 参数
/// * `config` - 消息日志配置
///
/// # 返回
/// * `MessageLogRef` - 按 `backend` 选择的日志实现
pub fn build_message_log(config: &MessageLogConfig) -> Result<MessageLogRef> {
    let log: MessageLogRef = match config.backend {
        LogBackend::Memory => Arc::new(InMemoryMessageLog::new()),
        LogBackend::File => {
            let path = config
                .file_path
                .as_deref()
                .ok_or_else(|| anyhow!("message_log.file_path is required for file backend"))?;
            Arc::new(FileMessageLog::open(path).context("Failed to open file message log")?)
        }
        LogBackend::Firebase => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("message_log.database_url is required for firebase backend"))?;
            Arc::new(
                FirebaseMessageLog::new(url, &config.path)
                    .context("Failed to build realtime database log")?,
            )
        }
    };

    info!(
        backend = log.backend(),
        window = config.effective_window(),
        "消息日志已初始化"
    );
    Ok(log)
}
