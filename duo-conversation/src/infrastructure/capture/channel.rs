use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use duo_chat_core::{ChatError, Result};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::repository::{CaptureDevice, CaptureLease, DeviceHandle};

type ChunkSender = mpsc::UnboundedSender<std::result::Result<Vec<u8>, ChatError>>;

struct DeviceSlot {
    active: Option<ChunkSender>,
    available: bool,
    open_count: usize,
}

fn lock(slot: &Mutex<DeviceSlot>) -> MutexGuard<'_, DeviceSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 通道录音设备
///
/// 宿主平台的录音器通过 [`CaptureFeed`] 推送编码后的数据块；设备同一时刻只允许一次占用
#[derive(Clone)]
pub struct ChannelCaptureDevice {
    content_type: String,
    slot: Arc<Mutex<DeviceSlot>>,
}

/// 宿主侧的数据入口
#[derive(Clone)]
pub struct CaptureFeed {
    slot: Arc<Mutex<DeviceSlot>>,
}

impl ChannelCaptureDevice {
    pub fn new(content_type: impl Into<String>) -> (Self, CaptureFeed) {
        let slot = Arc::new(Mutex::new(DeviceSlot {
            active: None,
            available: true,
            open_count: 0,
        }));
        (
            Self {
                content_type: content_type.into(),
                slot: slot.clone(),
            },
            CaptureFeed { slot },
        )
    }
}

#[async_trait::async_trait]
impl CaptureDevice for ChannelCaptureDevice {
    async fn acquire(&self) -> Result<CaptureLease> {
        let mut slot = lock(&self.slot);
        if !slot.available {
            return Err(ChatError::DeviceUnavailable(
                "microphone permission denied".to_string(),
            ));
        }
        if slot.active.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(ChatError::DeviceUnavailable("device busy".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        slot.active = Some(tx);
        slot.open_count += 1;
        debug!(open_count = slot.open_count, "录音设备已打开");

        let release_slot = self.slot.clone();
        Ok(CaptureLease {
            content_type: self.content_type.clone(),
            chunks: rx,
            handle: DeviceHandle::new(move || {
                lock(&release_slot).active = None;
                debug!("录音设备已关闭");
            }),
        })
    }
}

impl CaptureFeed {
    /// 推送一个数据块；设备未打开时返回 false
    pub fn push(&self, chunk: impl Into<Vec<u8>>) -> bool {
        match &lock(&self.slot).active {
            Some(tx) => tx.send(Ok(chunk.into())).is_ok(),
            None => false,
        }
    }

    /// 上报设备失效（例如麦克风被拔出）
    pub fn fail(&self, reason: &str) -> bool {
        match &lock(&self.slot).active {
            Some(tx) => tx
                .send(Err(ChatError::DeviceUnavailable(reason.to_string())))
                .is_ok(),
            None => false,
        }
    }

    /// 模拟权限被拒绝或设备缺失
    pub fn set_available(&self, available: bool) {
        lock(&self.slot).available = available;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.slot).active.is_some()
    }

    /// 累计打开次数
    pub fn open_count(&self) -> usize {
        lock(&self.slot).open_count
    }
}
