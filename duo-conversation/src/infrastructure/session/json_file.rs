use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::warn;

use crate::domain::model::UserSession;
use crate::domain::repository::SessionStore;

/// JSON 文件会话存储
///
/// 文件内容损坏时视为没有会话，而不是报错
#[derive(Debug, Clone)]
pub struct JsonFileSessionStore {
    path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn load(&self) -> Result<Option<UserSession>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read session file {:?}", self.path));
            }
        };

        match serde_json::from_str::<UserSession>(&content) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                warn!(path = ?self.path, error = %err, "会话文件损坏，忽略");
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &UserSession) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create session dir {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(session).context("encode session")?;
        fs::write(&self.path, content)
            .await
            .with_context(|| format!("write session file {:?}", self.path))
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove session file {:?}", self.path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSessionStore::new(dir.path().join("nested/session.json"));
        assert_eq!(store.load().await.unwrap(), None);

        let session = UserSession::authenticated("Alice");
        store.save(&session).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(session));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        // 重复清除不报错
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileSessionStore::new(&path);
        assert_eq!(store.load().await.unwrap(), None);
    }
}
