use std::fmt;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use duo_chat_core::{ChatError, RecordingConfig, Result, current_millis};
use duo_media::MediaKind;
use duo_message_log::AppendReceipt;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::application::composer::CompositionController;
use crate::domain::model::{ChatNotice, NoticeSender};
use crate::domain::repository::{CaptureDeviceRef, ChunkStream, DeviceHandle};

const TICK: Duration = Duration::from_secs(1);

/// 录音状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingPhase {
    Idle,
    Capturing,
    Finalizing,
}

impl fmt::Display for RecordingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordingPhase::Idle => "idle",
            RecordingPhase::Capturing => "capturing",
            RecordingPhase::Finalizing => "finalizing",
        };
        f.write_str(label)
    }
}

/// `stop()` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// 当前没有录音
    NotRecording,
    /// 录音过短（误触），静默丢弃
    DiscardedTooShort { bytes: usize },
    /// 已作为音频附件发送
    Sent(AppendReceipt),
}

/// 采集中的后台任务与设备句柄
struct Worker {
    handle: DeviceHandle,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct State {
    phase: RecordingPhase,
    elapsed_seconds: u64,
    buffer: Vec<u8>,
    content_type: String,
    generation: u64,
}

impl State {
    fn reset(&mut self) {
        self.phase = RecordingPhase::Idle;
        self.elapsed_seconds = 0;
        self.buffer = Vec::new();
    }
}

/// 当前采集占用的设备
///
/// 独立于 `State` 且只在同步代码中加锁，销毁会话时无需等待状态锁即可释放设备
type WorkerSlot = Arc<std::sync::Mutex<Option<Worker>>>;

fn take_worker(slot: &WorkerSlot) -> Option<Worker> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// 语音录制会话
///
/// 设备只在 `Capturing` 期间被占用，停止、取消、设备失效和会话销毁时都会释放
pub struct RecordingSession {
    device: CaptureDeviceRef,
    composer: Arc<CompositionController>,
    sender: String,
    config: RecordingConfig,
    notices: NoticeSender,
    state: Arc<Mutex<State>>,
    worker: WorkerSlot,
}

impl RecordingSession {
    /// 设备中途失效时向 `notices` 发送 `DeviceUnavailable` 通知
    pub fn new(
        device: CaptureDeviceRef,
        composer: Arc<CompositionController>,
        sender: impl Into<String>,
        config: RecordingConfig,
        notices: NoticeSender,
    ) -> Self {
        Self {
            device,
            composer,
            sender: sender.into(),
            state: Arc::new(Mutex::new(State {
                phase: RecordingPhase::Idle,
                elapsed_seconds: 0,
                buffer: Vec::new(),
                content_type: config.content_type.clone(),
                generation: 0,
            })),
            worker: Arc::new(std::sync::Mutex::new(None)),
            config,
            notices,
        }
    }

    pub async fn phase(&self) -> RecordingPhase {
        self.state.lock().await.phase
    }

    pub async fn elapsed_seconds(&self) -> u64 {
        self.state.lock().await.elapsed_seconds
    }

    pub async fn buffered_bytes(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    /// 开始录音
    ///
    /// 已在录音或收尾时为空操作；设备获取失败保持 `Idle` 并返回 `DeviceUnavailable`
    #[instrument(skip(self), fields(sender = %self.sender))]
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.phase != RecordingPhase::Idle {
            debug!(phase = %state.phase, "录音已在进行，忽略 start");
            return Ok(());
        }

        let lease = self.device.acquire().await.map_err(|err| {
            warn!(error = %err, "录音设备获取失败");
            match err {
                ChatError::DeviceUnavailable(_) => err,
                other => ChatError::DeviceUnavailable(other.to_string()),
            }
        })?;

        state.generation += 1;
        state.phase = RecordingPhase::Capturing;
        state.elapsed_seconds = 0;
        state.buffer.clear();
        state.content_type = self.audio_content_type(&lease.content_type);

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pump_chunks(
            lease.chunks,
            stop_rx,
            self.state.clone(),
            state.generation,
            self.worker.clone(),
            self.notices.clone(),
        ));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Worker {
            handle: lease.handle,
            stop_tx,
            task,
        });
        info!(content_type = %state.content_type, "开始录音");
        Ok(())
    }

    /// 结束录音并发送
    ///
    /// 低于最小有效长度的录音静默丢弃；无论发送结果如何最终都回到 `Idle`
    #[instrument(skip(self), fields(sender = %self.sender))]
    pub async fn stop(&self) -> Result<StopOutcome> {
        let worker = {
            let mut state = self.state.lock().await;
            if state.phase != RecordingPhase::Capturing {
                return Ok(StopOutcome::NotRecording);
            }
            state.phase = RecordingPhase::Finalizing;
            take_worker(&self.worker)
        };

        if let Some(Worker {
            mut handle,
            stop_tx,
            task,
        }) = worker
        {
            handle.release();
            let _ = stop_tx.send(());
            if let Err(err) = task.await {
                warn!(error = %err, "录音采集任务异常结束");
            }
        }

        let (payload, content_type, elapsed) = {
            let mut state = self.state.lock().await;
            (
                std::mem::take(&mut state.buffer),
                state.content_type.clone(),
                state.elapsed_seconds,
            )
        };

        let outcome = if payload.len() < self.config.min_payload_bytes {
            debug!(
                bytes = payload.len(),
                min = self.config.min_payload_bytes,
                "录音过短，丢弃"
            );
            Ok(StopOutcome::DiscardedTooShort {
                bytes: payload.len(),
            })
        } else {
            let file_name = self.file_name(&content_type);
            info!(bytes = payload.len(), elapsed, "录音结束，发送语音消息");
            self.composer
                .send_attachment(&self.sender, &file_name, &content_type, &payload)
                .await
                .map(StopOutcome::Sent)
        };

        self.state.lock().await.reset();
        outcome
    }

    /// 取消录音：释放设备，丢弃数据，不发送
    ///
    /// 返回是否确实取消了一次录音
    #[instrument(skip(self), fields(sender = %self.sender))]
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.phase != RecordingPhase::Capturing {
            return false;
        }
        if let Some(Worker { mut handle, task, .. }) = take_worker(&self.worker) {
            task.abort();
            handle.release();
        }
        state.generation += 1;
        state.reset();
        info!("录音已取消");
        true
    }

    /// 录音必须以音频类型发送；设备声明的类型不是音频时使用配置值
    fn audio_content_type(&self, declared: &str) -> String {
        let declared = declared.trim();
        if MediaKind::from_content_type(declared) == MediaKind::Audio {
            declared.to_string()
        } else {
            self.config.content_type.clone()
        }
    }

    fn file_name(&self, content_type: &str) -> String {
        let extension = content_type
            .split(';')
            .next()
            .and_then(|mime| mime.split('/').nth(1))
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .unwrap_or("bin");
        format!(
            "{}-{}.{}",
            self.config.file_prefix,
            current_millis(),
            extension
        )
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        // 会话销毁时不能继续占用设备，采集任务持有的状态锁不影响释放
        if let Some(Worker { mut handle, task, .. }) = take_worker(&self.worker) {
            task.abort();
            handle.release();
        }
    }
}

/// 采集任务：累积数据块，每秒递增计时；收到停止信号后取走已到达的数据块再退出
async fn pump_chunks(
    mut chunks: ChunkStream,
    mut stop_rx: oneshot::Receiver<()>,
    state: Arc<Mutex<State>>,
    generation: u64,
    worker: WorkerSlot,
    notices: NoticeSender,
) {
    let mut ticker = interval_at(Instant::now() + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                let mut state = state.lock().await;
                if state.generation == generation {
                    while let Ok(Ok(chunk)) = chunks.try_recv() {
                        state.buffer.extend_from_slice(&chunk);
                    }
                }
                return;
            }
            chunk = chunks.recv() => {
                let mut state = state.lock().await;
                if state.generation != generation {
                    return;
                }
                match chunk {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(err)) => {
                        fail_capture(&mut state, err, &worker, &notices);
                        return;
                    }
                    None => {
                        // 停止流程会先释放设备，此时流结束是正常的
                        if state.phase == RecordingPhase::Capturing {
                            fail_capture(
                                &mut state,
                                ChatError::DeviceUnavailable("capture stream ended".to_string()),
                                &worker,
                                &notices,
                            );
                        }
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                let mut state = state.lock().await;
                if state.generation == generation && state.phase == RecordingPhase::Capturing {
                    state.elapsed_seconds += 1;
                }
            }
        }
    }
}

/// 设备中途失效：回到 `Idle`，丢弃数据并通知
fn fail_capture(state: &mut State, err: ChatError, worker: &WorkerSlot, notices: &NoticeSender) {
    if state.phase != RecordingPhase::Capturing {
        return;
    }
    let err = match err {
        ChatError::DeviceUnavailable(_) => err,
        other => ChatError::DeviceUnavailable(other.to_string()),
    };
    warn!(error = %err, "录音设备失效，丢弃录音");

    // 任务句柄属于当前任务自身，drop 即可
    if let Some(Worker { mut handle, .. }) = take_worker(worker) {
        handle.release();
    }
    state.generation += 1;
    state.reset();

    if let Some(notice) = ChatNotice::from_error(&err) {
        let _ = notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::capture::channel::ChannelCaptureDevice;
    use duo_media::InMemoryAttachmentStore;
    use duo_message_log::InMemoryMessageLog;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_drop_releases_device_while_state_is_locked() {
        let (device, feed) = ChannelCaptureDevice::new("audio/webm");
        let composer = Arc::new(CompositionController::new(
            Arc::new(InMemoryMessageLog::new()),
            Arc::new(InMemoryAttachmentStore::new("uploads")),
        ));
        let (notices, _notice_rx) = mpsc::unbounded_channel();
        let session = RecordingSession::new(
            Arc::new(device),
            composer,
            "Alice",
            RecordingConfig::default(),
            notices,
        );
        session.start().await.unwrap();
        assert!(feed.is_open());

        // 模拟采集任务正持有状态锁
        let state = session.state.clone();
        let _guard = state.lock().await;
        drop(session);
        assert!(!feed.is_open());
    }

    #[test]
    fn test_audio_content_type_falls_back_to_config() {
        let (device, _feed) = ChannelCaptureDevice::new("audio/webm");
        let composer = Arc::new(CompositionController::new(
            Arc::new(InMemoryMessageLog::new()),
            Arc::new(InMemoryAttachmentStore::new("uploads")),
        ));
        let (notices, _notice_rx) = mpsc::unbounded_channel();
        let session = RecordingSession::new(
            Arc::new(device),
            composer,
            "Alice",
            RecordingConfig::default(),
            notices,
        );
        assert_eq!(session.audio_content_type(" audio/ogg "), "audio/ogg");
        assert_eq!(session.audio_content_type("video/mp4"), "audio/webm");
    }
}
