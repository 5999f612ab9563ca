//! 自治动作
//!
//! 动作实现 AutonomousAction trait（id / type / title / execute），执行契约为 (Context, user_id) → JSON 结果。
//! `attempt` 负责单次动作的超时、重试与崩溃隔离，工作池路径与同步路径共用它，结果形状一致。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use super::context::{Context, ContextSnapshot};
use crate::core::{EngineError, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionOptions {
    pub requires_confirmation: bool,
    pub can_be_undone: bool,
    pub timeout_ms: u64,
    /// 出错时的总尝试次数（超时不重试）
    pub retry_count: u32,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            requires_confirmation: false,
            can_be_undone: false,
            timeout_ms: 30_000,
            retry_count: 3,
        }
    }
}

#[async_trait]
pub trait AutonomousAction: Send + Sync {
    fn id(&self) -> &str;

    fn action_type(&self) -> &str;

    fn title(&self) -> &str;

    fn options(&self) -> ActionOptions {
        ActionOptions::default()
    }

    /// Inline 在调度循环内执行，其余类型尝试卸载到工作池
    fn kind(&self) -> TaskKind {
        TaskKind::Inline
    }

    async fn execute(&self, context: &Context, user_id: &str) -> Result<Value, String>;
}

type Handler = dyn Fn(Context, String) -> BoxFuture<'static, Result<Value, String>> + Send + Sync;

/// 闭包形式的动作
pub struct FnAction {
    id: String,
    action_type: String,
    title: String,
    options: ActionOptions,
    kind: TaskKind,
    handler: Arc<Handler>,
}

impl FnAction {
    pub fn new<F, Fut>(
        id: impl Into<String>,
        action_type: impl Into<String>,
        title: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Context, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            id: id.into(),
            action_type: action_type.into(),
            title: title.into(),
            options: ActionOptions::default(),
            kind: TaskKind::Inline,
            handler: Arc::new(move |ctx: Context, user: String| handler(ctx, user).boxed()),
        }
    }

    pub fn with_options(mut self, options: ActionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl AutonomousAction for FnAction {
    fn id(&self) -> &str {
        &self.id
    }

    fn action_type(&self) -> &str {
        &self.action_type
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn options(&self) -> ActionOptions {
        self.options
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn execute(&self, context: &Context, user_id: &str) -> Result<Value, String> {
        (self.handler)(context.clone(), user_id.to_string()).await
    }
}

/// 动作实际走的执行路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPath {
    Offloaded,
    Inline,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::Offloaded => "offloaded",
            ExecutionPath::Inline => "inline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub id: String,
    pub success: bool,
    pub action_id: String,
    pub action_type: String,
    pub title: String,
    pub trigger_id: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub path: ExecutionPath,
    pub timestamp: DateTime<Utc>,
    pub context: ContextSnapshot,
}

/// 单次执行（含重试）的结果
#[derive(Debug)]
pub(crate) struct Attempt {
    pub outcome: Result<Value, ActionFailure>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ActionFailure {
    Error(String),
    Timeout(u64),
    Panicked,
}

impl ActionFailure {
    /// 审计日志中的 outcome 字段
    pub fn outcome(&self) -> &'static str {
        match self {
            ActionFailure::Error(_) => "error",
            ActionFailure::Timeout(_) => "timeout",
            ActionFailure::Panicked => "panic",
        }
    }

    pub fn into_error(self) -> EngineError {
        match self {
            ActionFailure::Error(msg) => EngineError::ActionFailed(msg),
            ActionFailure::Timeout(ms) => EngineError::ActionTimeout(ms),
            ActionFailure::Panicked => EngineError::ActionFailed("action panicked".to_string()),
        }
    }
}

/// 在超时内执行动作；返回 Err 时重试直到用完 `retry_count` 次，超时与崩溃立即结束
pub(crate) async fn attempt(
    action: Arc<dyn AutonomousAction>,
    context: Context,
    user_id: String,
) -> Attempt {
    attempt_counted(action, context, user_id, Arc::new(AtomicU32::new(0))).await
}

/// 同 `attempt`，每次调用前递增 `started`；任务被中止后调用方仍能读到真实次数
pub(crate) async fn attempt_counted(
    action: Arc<dyn AutonomousAction>,
    context: Context,
    user_id: String,
    started: Arc<AtomicU32>,
) -> Attempt {
    let options = action.options();
    let limit = Duration::from_millis(options.timeout_ms);
    let max_attempts = options.retry_count.max(1);

    loop {
        let attempts = started.fetch_add(1, Ordering::AcqRel) + 1;
        let run = AssertUnwindSafe(action.execute(&context, &user_id)).catch_unwind();
        let failure = match timeout(limit, run).await {
            Ok(Ok(Ok(value))) => {
                return Attempt {
                    outcome: Ok(value),
                    attempts,
                }
            }
            Ok(Ok(Err(e))) => ActionFailure::Error(e),
            Ok(Err(_)) => {
                return Attempt {
                    outcome: Err(ActionFailure::Panicked),
                    attempts,
                }
            }
            Err(_) => {
                return Attempt {
                    outcome: Err(ActionFailure::Timeout(options.timeout_ms)),
                    attempts,
                }
            }
        };

        if attempts >= max_attempts {
            return Attempt {
                outcome: Err(failure),
                attempts,
            };
        }
        tracing::debug!(action_id = action.id(), attempts, "action failed, retrying");
    }
}
