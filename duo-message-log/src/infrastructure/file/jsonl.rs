use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use duo_chat_core::{ChatError, InfraResultExt, current_millis};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, warn};
use ulid::{Generator, Ulid};

use crate::domain::model::{AppendReceipt, LogSnapshot, MessageRecord, RawEntry};
use crate::domain::repository::{MessageLog, SnapshotStream};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 文件中的一行
#[derive(Debug, Serialize, Deserialize)]
struct LogLine {
    key: String,
    value: Value,
}

struct WriterState {
    keys: Generator,
    last_timestamp: i64,
}

/// JSONL 文件消息日志（离线使用）
///
/// 每行一条 `{"key": ..., "value": {...}}`。订阅者轮询文件长度变化，
/// 因此同一文件上的其他进程写入也会被推送；本实例的追加会立即唤醒订阅者
#[derive(Clone)]
pub struct FileMessageLog {
    path: PathBuf,
    poll_interval: Duration,
    writer: Arc<Mutex<WriterState>>,
    changed: Arc<Notify>,
}

impl FileMessageLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {:?}", parent))?;
        }

        // 续写已有文件时时间戳不能回退
        let last_timestamp = match std::fs::read_to_string(&path) {
            Ok(content) => parse_lines(&content)
                .iter()
                .filter_map(|entry| entry.value.get("timestamp").and_then(Value::as_i64))
                .max()
                .unwrap_or(0),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => {
                return Err(err).with_context(|| format!("read log file {:?}", path));
            }
        };

        Ok(Self {
            path,
            poll_interval: DEFAULT_POLL_INTERVAL,
            writer: Arc::new(Mutex::new(WriterState {
                keys: Generator::new(),
                last_timestamp,
            })),
            changed: Arc::new(Notify::new()),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(&self, record: &MessageRecord) -> Result<AppendReceipt> {
        let mut writer = self.writer.lock().await;
        let id = writer
            .keys
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string();
        let timestamp = current_millis().max(writer.last_timestamp);

        let line = LogLine {
            key: id.clone(),
            value: record.to_wire(json!(timestamp)),
        };
        let mut encoded = serde_json::to_string(&line).context("encode log line")?;
        encoded.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open log file {:?}", self.path))?;
        file.write_all(encoded.as_bytes())
            .await
            .with_context(|| format!("append to log file {:?}", self.path))?;
        file.flush().await.context("flush log file")?;

        writer.last_timestamp = timestamp;
        Ok(AppendReceipt { id, timestamp })
    }
}

/// 解析文件内容，无法解析的行跳过
fn parse_lines(content: &str) -> Vec<RawEntry> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<LogLine>(line) {
            Ok(parsed) => Some(RawEntry::new(parsed.key, parsed.value)),
            Err(err) => {
                warn!(error = %err, "跳过无法解析的日志行");
                None
            }
        })
        .collect()
}

async fn read_entries(path: &Path) -> Result<Vec<RawEntry>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(parse_lines(&content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err).with_context(|| format!("read log file {:?}", path)),
    }
}

async fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err).with_context(|| format!("stat log file {:?}", path)),
    }
}

/// 订阅任务：文件长度变化时重新读取并推送完整快照
///
/// 读取失败只上报一次，直到再次成功读取前不会重复发送同一故障
async fn watch_file(
    path: PathBuf,
    limit: usize,
    poll_interval: Duration,
    changed: Arc<Notify>,
    mut last_len: u64,
    tx: mpsc::UnboundedSender<duo_chat_core::Result<LogSnapshot>>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    let mut failing = false;
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(path = ?path, "文件日志订阅已释放");
                return;
            }
            _ = interval.tick() => {}
            _ = changed.notified() => {}
        }

        let read = match file_len(&path).await {
            Ok(len) if len == last_len => Ok(None),
            Ok(len) => read_entries(&path).await.map(|entries| Some((len, entries))),
            Err(err) => Err(err),
        };

        match read {
            Ok(None) => failing = false,
            Ok(Some((len, entries))) => {
                failing = false;
                last_len = len;
                if tx.send(Ok(LogSnapshot::last_n(&entries, limit))).is_err() {
                    return;
                }
            }
            Err(err) if failing => debug!(error = %err, "文件日志仍不可读"),
            Err(err) => {
                warn!(error = %err, "读取文件日志失败");
                failing = true;
                if tx
                    .send(Err(ChatError::LogUnavailable(format!("{err:#}"))))
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MessageLog for FileMessageLog {
    async fn append(&self, record: &MessageRecord) -> duo_chat_core::Result<AppendReceipt> {
        let receipt = self
            .write_line(record)
            .await
            .into_chat(ChatError::LogUnavailable)?;
        debug!(id = %receipt.id, timestamp = receipt.timestamp, "消息已写入文件日志");
        self.changed.notify_waiters();
        Ok(receipt)
    }

    async fn subscribe(&self, limit: usize) -> duo_chat_core::Result<SnapshotStream> {
        let initial_len = file_len(&self.path)
            .await
            .into_chat(ChatError::LogUnavailable)?;
        let entries = read_entries(&self.path)
            .await
            .into_chat(ChatError::LogUnavailable)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(LogSnapshot::last_n(&entries, limit)));
        tokio::spawn(watch_file(
            self.path.clone(),
            limit,
            self.poll_interval,
            self.changed.clone(),
            initial_len,
            tx,
        ));
        Ok(rx)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
