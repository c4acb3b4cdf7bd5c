//! 快照投影
//!
//! 每次都从最新的完整快照重新推导消息序列，不做增量合并

use std::collections::HashMap;

use duo_chat_core::ChatError;
use duo_message_log::{LogSnapshot, RawEntry};
use serde_json::Value;
use tracing::warn;

use crate::domain::model::{Attachment, Message};

fn skip(key: &str, reason: &str) -> ChatError {
    ChatError::DecodeSkip {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// 服务端时间戳：整数毫秒；浮点数截断
fn timestamp_of(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

fn optional_str<'a>(
    object: &'a serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, &'static str> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err("field is not a string"),
    }
}

/// 解码一条原始记录
///
/// 缺失的 `text` 视为空串，缺失的附件字段视为无附件；只有 `fileType` 没有 `fileUrl` 时忽略附件，
/// 只有 `fileUrl` 时按 `other` 处理。缺少发送者或时间戳、或者既无文本也无附件的记录返回 `DecodeSkip`
pub fn decode_entry(entry: &RawEntry) -> Result<Message, ChatError> {
    let key = entry.key.as_str();
    let object = entry
        .value
        .as_object()
        .ok_or_else(|| skip(key, "record is not an object"))?;

    let sender = match object.get("sender") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => return Err(skip(key, "missing sender")),
    };

    let text = optional_str(object, "text")
        .map_err(|reason| skip(key, reason))?
        .unwrap_or_default()
        .to_string();

    let timestamp = object
        .get("timestamp")
        .and_then(timestamp_of)
        .ok_or_else(|| skip(key, "missing or non-numeric timestamp"))?;

    let file_url = optional_str(object, "fileUrl").map_err(|reason| skip(key, reason))?;
    let file_type = optional_str(object, "fileType").map_err(|reason| skip(key, reason))?;
    let attachment = file_url.map(|url| Attachment::new(url, file_type.unwrap_or_default()));

    if text.is_empty() && attachment.is_none() {
        return Err(skip(key, "neither text nor attachment"));
    }

    Ok(Message {
        id: Some(key.to_string()),
        sender,
        text,
        attachment,
        timestamp: Some(timestamp),
    })
}

/// 将一份完整快照投影为有序消息序列
///
/// - 畸形记录跳过，其余照常投影
/// - 重复 key 以后出现的值为准，保留首次出现的位置，保证 id 唯一
/// - 按时间戳升序稳定排序，相同时间戳保持快照中的顺序
pub fn project(snapshot: &LogSnapshot) -> Vec<Message> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(snapshot.entries.len());
    let mut unique: Vec<&RawEntry> = Vec::with_capacity(snapshot.entries.len());
    for entry in &snapshot.entries {
        match positions.get(entry.key.as_str()) {
            Some(&index) => unique[index] = entry,
            None => {
                positions.insert(entry.key.as_str(), unique.len());
                unique.push(entry);
            }
        }
    }

    let mut messages: Vec<Message> = unique
        .into_iter()
        .filter_map(|entry| match decode_entry(entry) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(error = %err, "跳过畸形消息记录");
                None
            }
        })
        .collect();

    // sort_by_key 是稳定排序
    messages.sort_by_key(|message| message.timestamp.unwrap_or_default());
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MediaKind;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn entry(key: &str, value: Value) -> RawEntry {
        RawEntry::new(key, value)
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages
            .iter()
            .map(|m| m.id.as_deref().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_decode_text_message() {
        let message = decode_entry(&entry(
            "k1",
            json!({"sender": "Alice", "text": "hi", "fileUrl": null, "fileType": null, "timestamp": 10}),
        ))
        .unwrap();
        assert_eq!(message.id.as_deref(), Some("k1"));
        assert_eq!(message.text, "hi");
        assert!(message.attachment.is_none());
        assert_eq!(message.timestamp, Some(10));
    }

    #[test]
    fn test_decode_attachment_kinds() {
        for (content_type, kind) in [
            ("image/png", MediaKind::Image),
            ("audio/webm", MediaKind::Audio),
            ("application/zip", MediaKind::Other),
        ] {
            let message = decode_entry(&entry(
                "k",
                json!({"sender": "A", "fileUrl": "https://x/f", "fileType": content_type, "timestamp": 1}),
            ))
            .unwrap();
            assert_eq!(message.text, "");
            assert_eq!(message.attachment.unwrap().media_kind, kind);
        }
    }

    #[test]
    fn test_decode_tolerates_missing_optional_fields() {
        let message = decode_entry(&entry(
            "k",
            json!({"sender": "A", "fileUrl": "https://x/f", "timestamp": 1}),
        ))
        .unwrap();
        assert_eq!(message.attachment.unwrap().media_kind, MediaKind::Other);

        let message = decode_entry(&entry(
            "k",
            json!({"sender": "A", "text": "t", "fileType": "image/png", "timestamp": 1}),
        ))
        .unwrap();
        assert!(message.attachment.is_none());
    }

    #[test]
    fn test_decode_rejects_malformed_records() {
        let bad = [
            json!("string"),
            json!({"text": "no sender", "timestamp": 1}),
            json!({"sender": "A", "text": "no timestamp"}),
            json!({"sender": "A", "text": "x", "timestamp": "soon"}),
            json!({"sender": "A", "text": "", "timestamp": 1}),
            json!({"sender": "A", "text": 5, "timestamp": 1}),
        ];
        for value in bad {
            let err = decode_entry(&entry("bad", value)).unwrap_err();
            assert!(matches!(err, ChatError::DecodeSkip { .. }));
        }
    }

    #[test]
    fn test_project_sorts_by_timestamp_and_skips_bad_records() {
        let snapshot = LogSnapshot::new(vec![
            entry("c", json!({"sender": "A", "text": "third", "timestamp": 30})),
            entry("bad", json!({"sender": "A"})),
            entry("a", json!({"sender": "B", "text": "first", "timestamp": 10})),
            entry("b", json!({"sender": "A", "text": "second", "timestamp": 20})),
        ]);
        let messages = project(&snapshot);
        assert_eq!(ids(&messages), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_project_ties_keep_snapshot_order() {
        let snapshot = LogSnapshot::new(vec![
            entry("x", json!({"sender": "A", "text": "1", "timestamp": 5})),
            entry("y", json!({"sender": "B", "text": "2", "timestamp": 5})),
            entry("z", json!({"sender": "A", "text": "3", "timestamp": 5})),
        ]);
        assert_eq!(ids(&project(&snapshot)), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_project_dedupes_keys() {
        let snapshot = LogSnapshot::new(vec![
            entry("a", json!({"sender": "A", "text": "old", "timestamp": 1})),
            entry("b", json!({"sender": "B", "text": "b", "timestamp": 1})),
            entry("a", json!({"sender": "A", "text": "new", "timestamp": 1})),
        ]);
        let messages = project(&snapshot);
        assert_eq!(ids(&messages), vec!["a", "b"]);
        assert_eq!(messages[0].text, "new");
    }

    #[test]
    fn test_project_is_pure_rederivation() {
        let first = LogSnapshot::new(vec![
            entry("a", json!({"sender": "A", "text": "1", "timestamp": 1})),
            entry("b", json!({"sender": "A", "text": "2", "timestamp": 2})),
        ]);
        let second = LogSnapshot::new(vec![entry(
            "b",
            json!({"sender": "A", "text": "2", "timestamp": 2}),
        )]);
        assert_eq!(project(&first).len(), 2);
        // 窗口滑出的记录不会残留
        assert_eq!(ids(&project(&second)), vec!["b"]);
        assert!(project(&LogSnapshot::default()).is_empty());
    }

    /// 合法文本、合法附件与各类畸形记录混合
    fn raw_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            (0u16..200, "[a-z ]{0,6}").prop_map(|(ts, text)| {
                json!({"sender": "A", "text": text, "timestamp": ts})
            }),
            (
                0u16..200,
                prop_oneof![Just("image/png"), Just("audio/webm"), Just("")]
            )
                .prop_map(|(ts, file_type)| {
                    json!({"sender": "B", "fileUrl": "https://x/f", "fileType": file_type, "timestamp": ts})
                }),
            Just(json!({"sender": "A", "text": "no timestamp"})),
            Just(json!({"sender": "A", "text": "bad", "timestamp": "soon"})),
            Just(json!("not an object")),
            (0u16..200).prop_map(|ts| json!({"sender": " ", "text": "x", "timestamp": ts})),
        ]
    }

    proptest! {
        #[test]
        fn test_projection_is_ordered_unique_and_complete(
            raw in proptest::collection::vec((0u8..20, raw_value()), 0..60)
        ) {
            let entries: Vec<RawEntry> = raw
                .into_iter()
                .map(|(key, value)| entry(&format!("k{key}"), value))
                .collect();
            let messages = project(&LogSnapshot::new(entries.clone()));

            let mut first_seen: HashMap<&str, usize> = HashMap::new();
            let mut last_value: HashMap<&str, &RawEntry> = HashMap::new();
            for (index, raw) in entries.iter().enumerate() {
                first_seen.entry(raw.key.as_str()).or_insert(index);
                last_value.insert(raw.key.as_str(), raw);
            }

            // 输出恰好是去重后可解码的那部分记录，且 id 唯一
            let expected: HashSet<&str> = last_value
                .iter()
                .filter(|(_, raw)| decode_entry(raw).is_ok())
                .map(|(key, _)| *key)
                .collect();
            let got: HashSet<&str> = ids(&messages).into_iter().collect();
            prop_assert_eq!(got.len(), messages.len());
            prop_assert_eq!(got, expected);

            // 时间戳非递减，相同时间戳按首次出现的位置排列
            for pair in messages.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(a.timestamp <= b.timestamp);
                if a.timestamp == b.timestamp {
                    let a_id = a.id.as_deref().unwrap_or_default();
                    let b_id = b.id.as_deref().unwrap_or_default();
                    prop_assert!(first_seen[a_id] < first_seen[b_id]);
                }
            }

            // 每条消息取该 key 最后一次出现的值
            for message in &messages {
                let key = message.id.as_deref().unwrap_or_default();
                let decoded = decode_entry(last_value[key]).ok();
                prop_assert_eq!(Some(message), decoded.as_ref());
            }
        }
    }
}
