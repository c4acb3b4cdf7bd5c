//! Wire 风格的依赖注入模块
//!
//! 根据配置构建附件存储实现

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use duo_chat_core::{MediaBackend, MediaConfig};
use tracing::info;

use crate::domain::repository::AttachmentStoreRef;
use crate::infrastructure::local::filesystem::FilesystemAttachmentStore;
use crate::infrastructure::memory::InMemoryAttachmentStore;
use crate::infrastructure::object_store::firebase::FirebaseStorageStore;

/// 构建附件存储
///
/// # 参数
/// * `config` - 附件存储配置
///
/// # 返回
/// * `AttachmentStoreRef` - 按 `backend` 选择的存储实现
pub fn build_attachment_store(config: &MediaConfig) -> Result<AttachmentStoreRef> {
    let store: AttachmentStoreRef = match config.backend {
        MediaBackend::Memory => Arc::new(InMemoryAttachmentStore::new(&config.upload_prefix)),
        MediaBackend::Local => {
            let dir = config
                .local_storage_dir
                .as_deref()
                .ok_or_else(|| anyhow!("media.local_storage_dir is required for local backend"))?;
            Arc::new(
                FilesystemAttachmentStore::new(
                    dir,
                    config.local_base_url.clone(),
                    &config.upload_prefix,
                )
                .context("Failed to build filesystem attachment store")?,
            )
        }
        MediaBackend::Firebase => {
            let bucket = config
                .bucket
                .as_deref()
                .ok_or_else(|| anyhow!("media.bucket is required for firebase backend"))?;
            Arc::new(
                FirebaseStorageStore::new(bucket, &config.upload_prefix)
                    .context("Failed to build firebase storage store")?,
            )
        }
    };

    info!(backend = store.backend(), prefix = %config.upload_prefix, "附件存储已初始化");
    Ok(store)
}
