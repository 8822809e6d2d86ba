//! 后台任务生命周期
//!
//! Worker 与 Bridge 共用：`CancellationToken` 负责通知退出，`JoinHandle`
//! 在停止时被等待，保证正在处理的批次跑完。重复调用 `stop` 是安全的。

use std::future::Future;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct BackgroundTask {
    name: &'static str,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// 启动后台任务，闭包拿到用于退出的取消令牌
    pub fn spawn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(f(token.clone()));
        Self {
            name,
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// 取消并等待任务结束
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(task = self.name, error = %err, "后台任务异常退出");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
