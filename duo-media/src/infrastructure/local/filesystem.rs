use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use duo_chat_core::{ChatError, InfraResultExt, build_object_key, current_millis};
use tokio::fs;
use tracing::debug;

use crate::domain::model::{StoredAttachment, UploadRequest};
use crate::domain::repository::AttachmentStore;

/// 本地文件系统附件存储
///
/// 配置了 `base_url` 时返回 `{base_url}/{object_key}`，否则返回 `file://` 地址
#[derive(Clone)]
pub struct FilesystemAttachmentStore {
    root: PathBuf,
    base_url: Option<String>,
    prefix: String,
}

impl FilesystemAttachmentStore {
    pub fn new(
        root: impl AsRef<Path>,
        base_url: Option<String>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create storage dir {:?}", root))?;
        Ok(Self {
            root,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            prefix: prefix.into(),
        })
    }

    fn file_path(&self, object_key: &str) -> PathBuf {
        self.root.join(object_key)
    }

    fn public_url(&self, object_key: &str, path: &Path) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base, object_key),
            None => format!("file://{}", path.display()),
        }
    }

    async fn write(&self, object_key: &str, payload: &[u8]) -> Result<PathBuf> {
        let path = self.file_path(object_key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir {:?}", parent))?;
        }
        fs::write(&path, payload)
            .await
            .with_context(|| format!("write file to {:?}", path))?;
        Ok(path)
    }
}

#[async_trait::async_trait]
impl AttachmentStore for FilesystemAttachmentStore {
    async fn upload(&self, request: &UploadRequest<'_>) -> duo_chat_core::Result<StoredAttachment> {
        let object_key = build_object_key(&self.prefix, current_millis(), request.file_name);
        let path = self
            .write(&object_key, request.payload)
            .await
            .into_chat(ChatError::StoreUnavailable)?;
        debug!(object_key = %object_key, path = ?path, "附件已写入本地存储");

        Ok(StoredAttachment {
            url: self.public_url(&object_key, &path),
            content_type: request.content_type.to_string(),
            object_key,
            size: request.payload.len() as u64,
        })
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

pub type FilesystemAttachmentStoreRef = Arc<FilesystemAttachmentStore>;
