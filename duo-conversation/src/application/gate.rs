use duo_chat_core::{ChatError, InfraResultExt, Result};
use tracing::{info, warn};

use crate::domain::model::UserSession;
use crate::domain::repository::SessionStoreRef;

/// 访问门禁
///
/// 共享的静态口令；口令正确后接受任意显示名称（去除首尾空白），没有账号体系
pub struct AccessGate {
    passcode: String,
    store: SessionStoreRef,
}

impl AccessGate {
    pub fn new(passcode: impl Into<String>, store: SessionStoreRef) -> Self {
        Self {
            passcode: passcode.into(),
            store,
        }
    }

    /// 登录：先校验口令，再校验名称
    pub async fn login(&self, passcode: &str, display_name: &str) -> Result<UserSession> {
        if passcode != self.passcode {
            warn!("口令错误，拒绝登录");
            return Err(ChatError::AccessDenied("incorrect passcode".to_string()));
        }
        let name = display_name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptyInput("display name is empty".to_string()));
        }

        let session = UserSession::authenticated(name);
        self.store
            .save(&session)
            .await
            .into_chat(ChatError::Internal)?;
        info!(name = %session.name, "登录成功");
        Ok(session)
    }

    /// 恢复上次保存的会话，未认证的会话不恢复
    pub async fn restore(&self) -> Result<Option<UserSession>> {
        let session = self.store.load().await.into_chat(ChatError::Internal)?;
        Ok(session.filter(|s| s.is_authenticated && !s.name.trim().is_empty()))
    }

    pub async fn logout(&self) -> Result<()> {
        self.store.clear().await.into_chat(ChatError::Internal)?;
        info!("已退出登录");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::repository::SessionStore;
    use crate::infrastructure::session::memory::InMemorySessionStore;

    fn gate() -> (AccessGate, InMemorySessionStore) {
        let store = InMemorySessionStore::new();
        (AccessGate::new("1234", Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_login_trims_name_and_persists() {
        let (gate, store) = gate();
        let session = gate.login("1234", "  Alice ").await.unwrap();
        assert_eq!(session.name, "Alice");
        assert!(session.is_authenticated);
        assert_eq!(store.load().await.unwrap(), Some(session.clone()));
        assert_eq!(gate.restore().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_wrong_passcode_checked_first() {
        let (gate, store) = gate();
        let err = gate.login("0000", "").await.unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied(_)));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let (gate, _) = gate();
        let err = gate.login("1234", "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyInput(_)));
    }

    #[tokio::test]
    async fn test_unauthenticated_session_not_restored() {
        let (gate, store) = gate();
        store
            .save(&UserSession {
                name: "Mallory".into(),
                is_authenticated: false,
            })
            .await
            .unwrap();
        assert_eq!(gate.restore().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let (gate, _) = gate();
        gate.login("1234", "Bob").await.unwrap();
        gate.logout().await.unwrap();
        assert_eq!(gate.restore().await.unwrap(), None);
    }
}
