use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 待追加的消息记录（线上格式，不含时间戳）
///
/// `fileUrl` 与 `fileType` 要么同时为空（纯文本），要么同时存在（附件）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub sender: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
}

impl MessageRecord {
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            file_url: None,
            file_type: None,
        }
    }

    pub fn attachment(
        sender: impl Into<String>,
        file_url: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: String::new(),
            file_url: Some(file_url.into()),
            file_type: Some(file_type.into()),
        }
    }

    /// 转为带时间戳的线上 JSON 对象
    ///
    /// `timestamp` 可以是数值，也可以是服务端占位符（如 `{".sv":"timestamp"}`）
    pub fn to_wire(&self, timestamp: Value) -> Value {
        let mut object = Map::new();
        object.insert("sender".into(), Value::String(self.sender.clone()));
        object.insert("text".into(), Value::String(self.text.clone()));
        object.insert(
            "fileUrl".into(),
            self.file_url.clone().map(Value::String).unwrap_or(Value::Null),
        );
        object.insert(
            "fileType".into(),
            self.file_type.clone().map(Value::String).unwrap_or(Value::Null),
        );
        object.insert("timestamp".into(), timestamp);
        Value::Object(object)
    }
}

/// 追加回执：id 与时间戳在提交时一并分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub id: String,
    pub timestamp: i64,
}

/// 快照中的原始条目（未解码）
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub key: String,
    pub value: Value,
}

impl RawEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// 完整替换快照，条目按日志插入顺序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSnapshot {
    pub entries: Vec<RawEntry>,
}

impl LogSnapshot {
    pub fn new(entries: Vec<RawEntry>) -> Self {
        Self { entries }
    }

    /// 只保留最近 `limit` 条
    pub fn last_n(entries: &[RawEntry], limit: usize) -> Self {
        let start = entries.len().saturating_sub(limit);
        Self {
            entries: entries[start..].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_record_to_wire() {
        let wire = MessageRecord::text("Alice", "hi").to_wire(json!(42));
        assert_eq!(
            wire,
            json!({"sender": "Alice", "text": "hi", "fileUrl": null, "fileType": null, "timestamp": 42})
        );
    }

    #[test]
    fn test_attachment_record_has_empty_text() {
        let record = MessageRecord::attachment("Bob", "https://x/y.png", "image/png");
        let wire = record.to_wire(json!({".sv": "timestamp"}));
        assert_eq!(wire["text"], "");
        assert_eq!(wire["fileUrl"], "https://x/y.png");
        assert_eq!(wire["fileType"], "image/png");
        assert_eq!(wire["timestamp"][".sv"], "timestamp");
    }

    #[test]
    fn test_last_n_window() {
        let entries: Vec<RawEntry> = (0..5)
            .map(|i| RawEntry::new(format!("k{i}"), json!(i)))
            .collect();
        let snapshot = LogSnapshot::last_n(&entries, 3);
        let keys: Vec<_> = snapshot.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["k2", "k3", "k4"]);
        assert_eq!(LogSnapshot::last_n(&entries, 10).len(), 5);
    }
}
