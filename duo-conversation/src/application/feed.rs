use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use duo_chat_core::ChatError;
use duo_message_log::{MessageLogRef, SnapshotStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::model::Message;
use crate::domain::service::projection::project;

type UpdateFn = Box<dyn FnMut(&[Message]) + Send>;
type ErrorFn = Box<dyn FnMut(&ChatError) + Send>;

struct Callbacks {
    on_update: UpdateFn,
    on_error: ErrorFn,
}

/// 订阅共享状态：回调在取消订阅时被移除
struct Shared {
    closed: AtomicBool,
    callbacks: Mutex<Option<Callbacks>>,
}

impl Shared {
    /// 调用回调时不持有锁，回调内部取消订阅不会死锁
    fn with_callbacks(&self, f: impl FnOnce(&mut Callbacks)) -> bool {
        let taken = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut callbacks) = taken else {
            return false;
        };
        f(&mut callbacks);

        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut slot = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        *slot = Some(callbacks);
        true
    }
}

/// 消息流订阅句柄
///
/// `unsubscribe` 之后不再有任何回调；重复调用无副作用，drop 时自动取消
pub struct FeedSubscription {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedSubscription {
    pub fn unsubscribe(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        debug!("消息流订阅已释放");
    }

    pub fn is_active(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// 消息流投影器
///
/// 订阅消息日志，每份快照都重新投影为有序消息序列；订阅失败通过错误回调上报，
/// 并保留最近一次成功的序列
#[derive(Clone)]
pub struct FeedProjector {
    log: MessageLogRef,
    window: usize,
    latest: Arc<Mutex<Vec<Message>>>,
}

impl FeedProjector {
    pub fn new(log: MessageLogRef, window: usize) -> Self {
        Self {
            log,
            window,
            latest: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// 最近一次成功投影的序列
    pub fn latest(&self) -> Vec<Message> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn subscribe<U, E>(&self, on_update: U, on_error: E) -> FeedSubscription
    where
        U: FnMut(&[Message]) + Send + 'static,
        E: FnMut(&ChatError) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            callbacks: Mutex::new(Some(Callbacks {
                on_update: Box::new(on_update),
                on_error: Box::new(on_error),
            })),
        });

        let task = match self.log.subscribe(self.window).await {
            Ok(stream) => {
                info!(window = self.window, backend = self.log.backend(), "消息流订阅已建立");
                Some(tokio::spawn(run_projection(
                    stream,
                    shared.clone(),
                    self.latest.clone(),
                )))
            }
            Err(err) => {
                warn!(error = %err, "消息流订阅失败");
                shared.with_callbacks(|callbacks| (callbacks.on_error)(&err));
                None
            }
        };

        FeedSubscription {
            shared,
            task: Mutex::new(task),
        }
    }
}

async fn run_projection(
    mut stream: SnapshotStream,
    shared: Arc<Shared>,
    latest: Arc<Mutex<Vec<Message>>>,
) {
    while let Some(item) = stream.recv().await {
        let delivered = match item {
            Ok(snapshot) => {
                let messages = project(&snapshot);
                debug!(
                    raw = snapshot.len(),
                    projected = messages.len(),
                    "快照已投影"
                );
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = messages.clone();
                shared.with_callbacks(|callbacks| (callbacks.on_update)(&messages))
            }
            Err(err) => {
                // 保留上一次成功的序列，不清空
                warn!(error = %err, "消息流订阅出错");
                shared.with_callbacks(|callbacks| (callbacks.on_error)(&err))
            }
        };
        if !delivered {
            break;
        }
    }
    debug!("消息流投影任务结束");
}
