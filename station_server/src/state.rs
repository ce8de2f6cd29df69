//! 进程内共享状态。

use common_models::Sample;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 最近一次成功发布的采样，新接入的 `live` 客户端会先收到它。
///
/// 只有通过校验的采样才会写入；克隆开销很小，内部是 `Arc`。
#[derive(Debug, Clone, Default)]
pub struct LastKnownSample {
    inner: Arc<RwLock<Option<Sample>>>,
}

impl LastKnownSample {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn store(&self, sample: Sample) {
        *self.inner.write().await = Some(sample);
    }

    pub async fn get(&self) -> Option<Sample> {
        self.inner.read().await.clone()
    }

    /// 写入新采样，并在仍持有写锁时执行 `f`。
    ///
    /// `f` 不得等待网络 I/O；与 `with_current` 配合，保证新客户端要么在快照里看到这条采样，
    /// 要么在 `f` 的广播里收到它。
    pub async fn store_and<R>(&self, sample: Sample, f: impl FnOnce(&Sample) -> R) -> R {
        let mut guard = self.inner.write().await;
        let stored = guard.insert(sample);
        f(stored)
    }

    /// 持有读锁时以当前采样调用 `f`。
    pub async fn with_current<R>(&self, f: impl FnOnce(Option<&Sample>) -> R) -> R {
        let guard = self.inner.read().await;
        f(guard.as_ref())
    }
}
