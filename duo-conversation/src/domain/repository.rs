use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use duo_chat_core::ChatError;
use tokio::sync::mpsc;

use crate::domain::model::UserSession;

/// 录音数据块流；设备中途失效时推送 `Err`，设备关闭后流结束
pub type ChunkStream = mpsc::UnboundedReceiver<Result<Vec<u8>, ChatError>>;

/// 设备占用句柄，释放（或 drop）时关闭设备，只生效一次
pub struct DeviceHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("released", &self.is_released())
            .finish()
    }
}

/// 一次设备占用
#[derive(Debug)]
pub struct CaptureLease {
    /// 设备声明的内容类型
    pub content_type: String,
    pub chunks: ChunkStream,
    pub handle: DeviceHandle,
}

/// 录音设备接口
///
/// 同一时刻只能被一个录音会话占用；获取失败返回 `ChatError::DeviceUnavailable`
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn acquire(&self) -> duo_chat_core::Result<CaptureLease>;
}

pub type CaptureDeviceRef = Arc<dyn CaptureDevice>;

/// 登录会话存储接口
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<UserSession>>;

    async fn save(&self, session: &UserSession) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

pub type SessionStoreRef = Arc<dyn SessionStore>;
