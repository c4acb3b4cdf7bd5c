use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::domain::model::UserSession;
use crate::domain::repository::SessionStore;

/// 内存会话存储（进程退出即失效）
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    session: Arc<RwLock<Option<UserSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self) -> Result<Option<UserSession>> {
        Ok(self.session.read().await.clone())
    }

    async fn save(&self, session: &UserSession) -> Result<()> {
        *self.session.write().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.session.write().await.take();
        Ok(())
    }
}
