use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use duo_chat_core::{ChatError, InfraResultExt};
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::domain::model::{AppendReceipt, LogSnapshot, MessageRecord, RawEntry};
use crate::domain::repository::{MessageLog, SnapshotStream};
use crate::infrastructure::firebase::sse::{SseDecoder, SseEvent};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// 订阅窗口的本地镜像，按 key 排序（推送 id 的字典序即时间序）
#[derive(Debug, Default)]
struct WindowState {
    entries: BTreeMap<String, Value>,
}

impl WindowState {
    /// 应用一个流事件，返回窗口是否变化
    fn apply(&mut self, event: &SseEvent) -> Result<bool> {
        match event.event.as_str() {
            "put" => {
                let payload: StreamPayload =
                    serde_json::from_str(&event.data).context("decode put event")?;
                self.put_at(&segments(&payload.path), payload.data);
                Ok(true)
            }
            "patch" => {
                let payload: StreamPayload =
                    serde_json::from_str(&event.data).context("decode patch event")?;
                let base = segments(&payload.path);
                if let Value::Object(children) = payload.data {
                    for (child, value) in children {
                        let mut path = base.clone();
                        path.extend(segments(&child));
                        self.put_at(&path, value);
                    }
                }
                Ok(true)
            }
            "keep-alive" => Ok(false),
            "cancel" => bail!("subscription cancelled by server: {}", event.data),
            "auth_revoked" => bail!("subscription credential revoked"),
            other => {
                debug!(event = other, "忽略未知的流事件");
                Ok(false)
            }
        }
    }

    fn put_at(&mut self, path: &[String], value: Value) {
        match path {
            [] => {
                self.entries = match value {
                    Value::Object(map) => map.into_iter().collect(),
                    _ => BTreeMap::new(),
                };
            }
            [key] => {
                if value.is_null() {
                    self.entries.remove(key);
                } else {
                    self.entries.insert(key.clone(), value);
                }
            }
            [key, rest @ ..] => {
                let slot = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                set_nested(slot, rest, value);
            }
        }
    }

    fn snapshot(&self, limit: usize) -> LogSnapshot {
        let skip = self.entries.len().saturating_sub(limit);
        LogSnapshot::new(
            self.entries
                .iter()
                .skip(skip)
                .map(|(key, value)| RawEntry::new(key.clone(), value.clone()))
                .collect(),
        )
    }
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn set_nested(target: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        if rest.is_empty() {
            if value.is_null() {
                map.remove(head);
            } else {
                map.insert(head.clone(), value);
            }
        } else {
            let child = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            set_nested(child, rest, value);
        }
    }
}

/// Firebase Realtime Database 消息日志
///
/// 追加走 REST `POST`（服务端时间戳占位），订阅走 `text/event-stream`，
/// 每个事件后重新推送窗口的完整快照
#[derive(Clone)]
pub struct FirebaseMessageLog {
    client: Client,
    database_url: String,
    path: String,
    auth: Option<String>,
}

impl FirebaseMessageLog {
    pub fn new(database_url: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .build()
            .context("build realtime database http client")?;
        Ok(Self {
            client,
            database_url: database_url.into().trim_end_matches('/').to_string(),
            path: path.into().trim_matches('/').to_string(),
            auth: None,
        })
    }

    /// 附带数据库访问令牌（`auth` 查询参数）
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(token.into());
        self
    }

    fn node_url(&self, child: Option<&str>) -> String {
        match child {
            Some(child) => format!("{}/{}/{}.json", self.database_url, self.path, child),
            None => format!("{}/{}.json", self.database_url, self.path),
        }
    }

    fn with_auth_query(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    async fn push(&self, record: &MessageRecord) -> Result<AppendReceipt> {
        let body = record.to_wire(json!({ ".sv": "timestamp" }));
        let response = self
            .with_auth_query(self.client.post(self.node_url(None)))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("push message")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("database responded {}: {}", status, text);
        }
        let pushed: PushResponse = response.json().await.context("decode push response")?;

        // 读取服务端写入的时间戳
        let timestamp_url = self.node_url(Some(&format!("{}/timestamp", pushed.name)));
        let timestamp = self
            .with_auth_query(self.client.get(timestamp_url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .context("read server timestamp")?
            .error_for_status()
            .context("read server timestamp")?
            .json::<Value>()
            .await
            .context("decode server timestamp")?
            .as_i64()
            .ok_or_else(|| anyhow!("server timestamp missing for {}", pushed.name))?;

        Ok(AppendReceipt {
            id: pushed.name,
            timestamp,
        })
    }

    async fn open_stream(&self, limit: usize) -> Result<reqwest::Response> {
        let limit = limit.to_string();
        let response = self
            .with_auth_query(self.client.get(self.node_url(None)))
            .query(&[("orderBy", "\"$key\""), ("limitToLast", limit.as_str())])
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .context("open event stream")?;
        let status = response.status();
        if !status.is_success() {
            bail!("database responded {} to stream request", status);
        }
        Ok(response)
    }
}

/// 读取事件流直到服务端关闭或订阅被释放
async fn pump_stream(
    response: reqwest::Response,
    limit: usize,
    tx: mpsc::UnboundedSender<duo_chat_core::Result<LogSnapshot>>,
) {
    let mut stream = Box::pin(response.bytes_stream());
    let mut decoder = SseDecoder::default();
    let mut window = WindowState::default();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!("实时订阅已释放");
                return;
            }
            chunk = stream.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                warn!(error = %err, "实时订阅传输失败");
                let _ = tx.send(Err(ChatError::LogUnavailable(err.to_string())));
                return;
            }
            None => {
                let _ = tx.send(Err(ChatError::LogUnavailable(
                    "event stream closed by server".to_string(),
                )));
                return;
            }
        };

        for event in decoder.push(&bytes) {
            match window.apply(&event) {
                Ok(true) => {
                    if tx.send(Ok(window.snapshot(limit))).is_err() {
                        return;
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(error = %err, "实时订阅被终止");
                    let _ = tx.send(Err(ChatError::LogUnavailable(format!("{err:#}"))));
                    return;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MessageLog for FirebaseMessageLog {
    #[instrument(skip(self, record), fields(sender = %record.sender))]
    async fn append(&self, record: &MessageRecord) -> duo_chat_core::Result<AppendReceipt> {
        let receipt = self.push(record).await.into_chat(ChatError::LogUnavailable)?;
        debug!(id = %receipt.id, timestamp = receipt.timestamp, "消息已追加到实时数据库");
        Ok(receipt)
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, limit: usize) -> duo_chat_core::Result<SnapshotStream> {
        let response = self
            .open_stream(limit)
            .await
            .into_chat(ChatError::LogUnavailable)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_stream(response, limit, tx));
        Ok(rx)
    }

    fn backend(&self) -> &'static str {
        "firebase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, data: Value) -> SseEvent {
        SseEvent {
            event: kind.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_root_put_replaces_window() {
        let mut window = WindowState::default();
        window
            .apply(&event(
                "put",
                json!({"path": "/", "data": {"-b": {"text": "2"}, "-a": {"text": "1"}}}),
            ))
            .unwrap();
        let snapshot = window.snapshot(100);
        let keys: Vec<_> = snapshot.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["-a", "-b"]);

        window
            .apply(&event("put", json!({"path": "/", "data": null})))
            .unwrap();
        assert!(window.snapshot(100).is_empty());
    }

    #[test]
    fn test_child_put_and_removal() {
        let mut window = WindowState::default();
        window
            .apply(&event("put", json!({"path": "/-a", "data": {"text": "1"}})))
            .unwrap();
        window
            .apply(&event("put", json!({"path": "/-a/timestamp", "data": 99})))
            .unwrap();
        assert_eq!(window.snapshot(10).entries[0].value["timestamp"], 99);

        window
            .apply(&event("put", json!({"path": "/-a", "data": null})))
            .unwrap();
        assert!(window.snapshot(10).is_empty());
    }

    #[test]
    fn test_patch_merges_children_and_window_is_bounded() {
        let mut window = WindowState::default();
        window
            .apply(&event(
                "patch",
                json!({"path": "/", "data": {"-a": {"t": 1}, "-b": {"t": 2}, "-c": {"t": 3}}}),
            ))
            .unwrap();
        let snapshot = window.snapshot(2);
        let keys: Vec<_> = snapshot.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["-b", "-c"]);
    }

    #[test]
    fn test_keep_alive_and_cancel() {
        let mut window = WindowState::default();
        assert!(!window.apply(&event("keep-alive", Value::Null)).unwrap());
        assert!(window.apply(&event("cancel", Value::Null)).is_err());
        assert!(window.apply(&event("auth_revoked", Value::Null)).is_err());
    }

    #[test]
    fn test_node_urls() {
        let log = FirebaseMessageLog::new("https://demo.firebaseio.com/", "/private-chat-messages/")
            .unwrap();
        assert_eq!(
            log.node_url(None),
            "https://demo.firebaseio.com/private-chat-messages.json"
        );
        assert_eq!(
            log.node_url(Some("-abc/timestamp")),
            "https://demo.firebaseio.com/private-chat-messages/-abc/timestamp.json"
        );
    }
}
