//! 任务调度：有界工作池 + 同步回退
//!
//! 较重的任务（上下文获取、重型动作）尝试卸载到工作池；池饱和、超时或任务崩溃时，
//! 用同一个 job 在当前任务上同步执行，保证调用方拿到的结果形状一致。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::SchedulerSection;
use crate::core::EngineError;

/// 任务类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskKind {
    /// 轻量，直接在调用方执行
    Inline,
    /// 可卸载到工作池，受并发限制
    Heavy,
    /// 后台 IO（如上下文获取），同样走工作池
    Background,
}

impl TaskKind {
    pub fn is_offloadable(&self) -> bool {
        !matches!(self, TaskKind::Inline)
    }
}

/// 卸载尝试的结果
#[derive(Debug)]
pub enum Offload<T> {
    Completed(T),
    /// 任务未启动（池满或 Inline），调用方可安全回退
    Unavailable(EngineError),
    /// 任务已在工作池启动，但超时被中止或崩溃；job 可能已部分执行
    Abandoned(EngineError),
}

/// 有界工作池
pub struct TaskScheduler {
    /// 并发限制（默认 3）
    worker_semaphore: Arc<Semaphore>,
    /// 单次卸载等待上限
    offload_timeout: Duration,
}

impl TaskScheduler {
    pub fn new(max_workers: usize, offload_timeout: Duration) -> Self {
        Self {
            worker_semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            offload_timeout,
        }
    }

    /// 阻塞等待一个工作许可
    pub async fn acquire_worker(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.worker_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::OffloadUnavailable("worker pool closed".to_string()))
    }

    /// 当前空闲许可数
    pub fn available_workers(&self) -> usize {
        self.worker_semaphore.available_permits()
    }

    /// 默认的单次卸载等待上限
    pub fn offload_timeout(&self) -> Duration {
        self.offload_timeout
    }

    /// 尝试在工作池中执行；不等待许可，池满立即返回 Unavailable
    pub async fn try_offload<T, Fut>(&self, kind: TaskKind, fut: Fut) -> Offload<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.try_offload_within(kind, fut, self.offload_timeout).await
    }

    /// 同 `try_offload`，但使用调用方给定的等待上限
    pub async fn try_offload_within<T, Fut>(
        &self,
        kind: TaskKind,
        fut: Fut,
        budget: Duration,
    ) -> Offload<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !kind.is_offloadable() {
            return Offload::Unavailable(EngineError::OffloadUnavailable(
                "inline task".to_string(),
            ));
        }

        let permit = match self.worker_semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                return Offload::Unavailable(EngineError::OffloadUnavailable(
                    "worker pool saturated".to_string(),
                ))
            }
        };

        let handle = tokio::spawn(async move {
            let _permit = permit;
            fut.await
        });
        let abort = handle.abort_handle();

        match tokio::time::timeout(budget, handle).await {
            Ok(Ok(value)) => Offload::Completed(value),
            Ok(Err(join_err)) => Offload::Abandoned(EngineError::OffloadUnavailable(format!(
                "worker failed: {join_err}"
            ))),
            Err(_) => {
                abort.abort();
                Offload::Abandoned(EngineError::OffloadUnavailable(format!(
                    "worker timed out after {} ms",
                    budget.as_millis()
                )))
            }
        }
    }

    /// 卸载执行 `job(payload)`；未启动、超时或崩溃时回退为在当前任务上执行同一个 job
    ///
    /// job 会在超时后被重跑，只适合无副作用的任务。
    pub async fn run_offloaded<P, T, F, Fut>(&self, kind: TaskKind, payload: P, job: F) -> T
    where
        P: Clone + Send + 'static,
        F: Fn(P) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match self.try_offload(kind, job(payload.clone())).await {
            Offload::Completed(value) => value,
            Offload::Unavailable(reason) | Offload::Abandoned(reason) => {
                if kind.is_offloadable() {
                    tracing::debug!(?kind, %reason, "offload unavailable, running inline");
                }
                job(payload).await
            }
        }
    }
}

impl From<&SchedulerSection> for TaskScheduler {
    fn from(section: &SchedulerSection) -> Self {
        Self::new(section.max_workers, Duration::from_millis(section.offload_timeout_ms))
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(35))
    }
}
