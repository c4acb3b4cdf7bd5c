use std::sync::Arc;

use duo_chat_core::ChatError;
use duo_conversation::{AccessGate, JsonFileSessionStore};

#[tokio::test]
async fn session_survives_restart_until_logout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let gate = AccessGate::new("1234", Arc::new(JsonFileSessionStore::new(&path)));
    let session = gate.login("1234", "Alice").await.unwrap();

    // 模拟重新启动
    let gate = AccessGate::new("1234", Arc::new(JsonFileSessionStore::new(&path)));
    assert_eq!(gate.restore().await.unwrap(), Some(session));

    gate.logout().await.unwrap();
    assert_eq!(gate.restore().await.unwrap(), None);
    assert!(!path.exists());
}

#[tokio::test]
async fn wrong_passcode_does_not_touch_saved_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let gate = AccessGate::new("1234", Arc::new(JsonFileSessionStore::new(&path)));

    gate.login("1234", "Alice").await.unwrap();
    let err = gate.login("9999", "Mallory").await.unwrap_err();
    assert_eq!(err, ChatError::AccessDenied("incorrect passcode".to_string()));
    assert_eq!(gate.restore().await.unwrap().unwrap().name, "Alice");
}
