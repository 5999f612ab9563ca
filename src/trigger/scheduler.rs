//! 触发调度器
//!
//! 周期性地获取上下文、评估触发器、执行到期动作，并把结果回灌给模式学习器与奖励学习智能体：
//! - 评估单飞：上一轮未结束时新一轮直接跳过
//! - 动作按类型卸载到工作池，池满时在当前任务上同步执行，结果形状不变；已启动的任务不会重跑
//! - 单个动作失败只产生失败结果，不影响同轮其他触发器
//! - 停止调度只取消定时器，已在执行的动作会跑完

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::action::{
    attempt, attempt_counted, ActionFailure, ActionOptions, ActionResult, AutonomousAction, Attempt,
    ExecutionPath,
};
use super::context::{Context, ContextProvider};
use super::types::{Trigger, TriggerStats, MAX_SENSITIVITY, MIN_SENSITIVITY};
use crate::config::SchedulerSection;
use crate::core::{EngineError, Offload, TaskKind, TaskScheduler};
use crate::learning::PatternLearner;
use crate::memory::{DayPeriod, Interaction, SCHEMA_VERSION};
use crate::rlvr::{Feedback, Outcome, RlvrAgent, VisualState};

/// 成功结果写入记忆时使用的类别
pub const ACTION_OUTCOME_CATEGORY: &str = "autonomous_actions";
const SENSITIVITY_UP: f64 = 1.1;
const SENSITIVITY_DOWN: f64 = 0.9;
/// 卸载动作时在“超时 × 尝试次数”之外预留的调度余量
const OFFLOAD_MARGIN_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub history_capacity: usize,
    /// 调整灵敏度时回看的同类型结果数
    pub feedback_window: usize,
    pub min_sensitivity: f64,
    pub max_sensitivity: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            history_capacity: 100,
            feedback_window: 20,
            min_sensitivity: MIN_SENSITIVITY,
            max_sensitivity: MAX_SENSITIVITY,
        }
    }
}

impl From<SchedulerSection> for SchedulerConfig {
    fn from(section: SchedulerSection) -> Self {
        let min_sensitivity = section.min_sensitivity.max(f64::MIN_POSITIVE);
        Self {
            interval: Duration::from_secs(section.interval_secs.max(1)),
            history_capacity: section.history_capacity,
            feedback_window: section.feedback_window,
            min_sensitivity,
            max_sensitivity: section.max_sensitivity.max(min_sensitivity),
        }
    }
}

pub struct TriggerScheduler {
    config: SchedulerConfig,
    provider: Arc<dyn ContextProvider>,
    workers: Arc<TaskScheduler>,
    learner: Arc<PatternLearner>,
    agent: Arc<RlvrAgent>,
    triggers: RwLock<Vec<Trigger>>,
    actions: RwLock<HashMap<String, Arc<dyn AutonomousAction>>>,
    /// 最新在前
    history: Mutex<VecDeque<ActionResult>>,
    evaluating: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

/// 评估期间持有，离开作用域时释放单飞标记
struct EvaluationGuard<'a>(&'a AtomicBool);

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TriggerScheduler {
    pub fn new(
        config: SchedulerConfig,
        provider: Arc<dyn ContextProvider>,
        workers: Arc<TaskScheduler>,
        learner: Arc<PatternLearner>,
        agent: Arc<RlvrAgent>,
    ) -> Self {
        Self {
            config,
            provider,
            workers,
            learner,
            agent,
            triggers: RwLock::new(Vec::new()),
            actions: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            evaluating: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    // ---------- 注册 ----------

    pub async fn add_action(&self, action: Arc<dyn AutonomousAction>) {
        let id = action.id().to_string();
        tracing::debug!(action_id = %id, action_type = action.action_type(), "action registered");
        self.actions.write().await.insert(id, action);
    }

    /// 已绑定该动作的触发器保留，评估时跳过并告警
    pub async fn remove_action(&self, action_id: &str) -> Result<(), EngineError> {
        self.actions
            .write()
            .await
            .remove(action_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::ActionNotFound(action_id.to_string()))
    }

    /// 同 id 的触发器会被替换；绑定的动作必须已注册
    pub async fn add_trigger(&self, trigger: Trigger) -> Result<(), EngineError> {
        if !self.actions.read().await.contains_key(&trigger.action_id) {
            return Err(EngineError::ActionNotFound(trigger.action_id.clone()));
        }
        let mut triggers = self.triggers.write().await;
        triggers.retain(|t| t.id != trigger.id);
        tracing::debug!(trigger_id = %trigger.id, action_id = %trigger.action_id, "trigger registered");
        triggers.push(trigger);
        Ok(())
    }

    pub async fn remove_trigger(&self, trigger_id: &str) -> Result<(), EngineError> {
        let mut triggers = self.triggers.write().await;
        let before = triggers.len();
        triggers.retain(|t| t.id != trigger_id);
        if triggers.len() == before {
            return Err(EngineError::TriggerNotFound(trigger_id.to_string()));
        }
        Ok(())
    }

    pub async fn set_trigger_enabled(&self, trigger_id: &str, enabled: bool) -> Result<(), EngineError> {
        let mut triggers = self.triggers.write().await;
        let trigger = triggers
            .iter_mut()
            .find(|t| t.id == trigger_id)
            .ok_or_else(|| EngineError::TriggerNotFound(trigger_id.to_string()))?;
        trigger.enabled = enabled;
        Ok(())
    }

    // ---------- 生命周期 ----------

    /// 启动周期评估；已在运行时返回 false
    pub async fn start(self: &Arc<Self>, user_id: impl Into<String>) -> bool {
        let mut slot = self.cancel.lock().await;
        if slot.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());

        let this = Arc::clone(self);
        let user_id = user_id.into();
        let period = self.config.interval.max(Duration::from_millis(1));
        tracing::info!(user_id = %user_id, interval_ms = period.as_millis() as u64, "trigger scheduler started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        this.evaluate_once(&user_id).await;
                    }
                }
            }
            tracing::info!(user_id = %user_id, "trigger scheduler stopped");
        });
        true
    }

    /// 停止定时器；未运行时返回 false
    pub async fn stop(&self) -> bool {
        match self.cancel.lock().await.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.cancel.lock().await.is_some()
    }

    // ---------- 评估 ----------

    /// 立即评估一轮；已有评估在进行时返回 None
    pub async fn evaluate_once(&self, user_id: &str) -> Option<Vec<ActionResult>> {
        self.evaluate_at(user_id, Utc::now()).await
    }

    pub async fn evaluate_at(&self, user_id: &str, now: DateTime<Utc>) -> Option<Vec<ActionResult>> {
        if self
            .evaluating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(user_id, "evaluation already in flight, skipping");
            return None;
        }
        let _guard = EvaluationGuard(&self.evaluating);

        let context = match self.fetch_context(user_id).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "context unavailable, skipping cycle");
                return Some(Vec::new());
            }
        };
        if context.schema_version > SCHEMA_VERSION {
            let err = EngineError::UnsupportedSchema {
                found: context.schema_version,
                supported: SCHEMA_VERSION,
            };
            tracing::warn!(user_id, error = %err, "context rejected");
            return Some(Vec::new());
        }

        let actions = self.actions.read().await.clone();
        let due: Vec<(String, Arc<dyn AutonomousAction>)> = {
            let mut triggers = self.triggers.write().await;
            triggers
                .iter_mut()
                .filter(|t| t.is_due(&context, now))
                .filter_map(|t| {
                    let Some(action) = actions.get(&t.action_id) else {
                        tracing::warn!(trigger_id = %t.id, action_id = %t.action_id, "trigger bound to missing action");
                        return None;
                    };
                    t.mark_fired(now);
                    Some((t.id.clone(), Arc::clone(action)))
                })
                .collect()
        };

        let mut results = Vec::with_capacity(due.len());
        for (trigger_id, action) in due {
            let action_id = action.id().to_string();
            tracing::info!(user_id, trigger_id = %trigger_id, action_id = %action_id, "trigger fired");

            let result = self
                .execute_action(action, &context, user_id, Some(trigger_id), now)
                .await;
            self.record(result.clone()).await;
            self.feedback(user_id, &context, &result).await;
            results.push(result);
        }
        Some(results)
    }

    /// 先尝试工作池，失败（含提供方报错）时直接调用一次
    async fn fetch_context(&self, user_id: &str) -> Result<Context, EngineError> {
        let provider = Arc::clone(&self.provider);
        let uid = user_id.to_string();
        let offloaded = self
            .workers
            .try_offload(TaskKind::Background, async move { provider.get_context(&uid).await })
            .await;
        match offloaded {
            Offload::Completed(Ok(context)) => Ok(context),
            Offload::Completed(Err(e)) | Offload::Unavailable(e) | Offload::Abandoned(e) => {
                tracing::debug!(user_id, reason = %e, "offloaded context fetch failed, calling provider directly");
                self.provider.get_context(user_id).await
            }
        }
    }

    async fn execute_action(
        &self,
        action: Arc<dyn AutonomousAction>,
        context: &Context,
        user_id: &str,
        trigger_id: Option<String>,
        now: DateTime<Utc>,
    ) -> ActionResult {
        let start = Instant::now();
        let kind = action.kind();

        let (run, path) = if kind.is_offloadable() {
            self.execute_offloaded(&action, context, user_id).await
        } else {
            (
                attempt(Arc::clone(&action), context.clone(), user_id.to_string()).await,
                ExecutionPath::Inline,
            )
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match &run.outcome {
            Ok(_) => "ok",
            Err(failure) => failure.outcome(),
        };
        let audit = json!({
            "event": "action_audit",
            "user_id": user_id,
            "trigger_id": trigger_id,
            "action_id": action.id(),
            "action_type": action.action_type(),
            "ok": run.outcome.is_ok(),
            "outcome": outcome,
            "path": path.as_str(),
            "attempts": run.attempts,
            "duration_ms": duration_ms,
        });
        tracing::info!(audit = %audit.to_string(), "action");

        let (success, result, error) = match run.outcome {
            Ok(value) => (true, Some(value), None),
            Err(failure) => (false, None, Some(failure.into_error().to_string())),
        };
        ActionResult {
            id: format!("result_{}", uuid::Uuid::new_v4()),
            success,
            action_id: action.id().to_string(),
            action_type: action.action_type().to_string(),
            title: action.title().to_string(),
            trigger_id,
            result,
            error,
            duration_ms,
            attempts: run.attempts,
            path,
            timestamp: now,
            context: context.snapshot(),
        }
    }

    /// 卸载执行；池满时同步执行，已启动的任务超时或崩溃则记为失败，不再重跑
    async fn execute_offloaded(
        &self,
        action: &Arc<dyn AutonomousAction>,
        context: &Context,
        user_id: &str,
    ) -> (Attempt, ExecutionPath) {
        let options = action.options();
        let budget = self.offload_budget(&options);
        let started = Arc::new(AtomicU32::new(0));
        let job = attempt_counted(
            Arc::clone(action),
            context.clone(),
            user_id.to_string(),
            Arc::clone(&started),
        );

        match self.workers.try_offload_within(action.kind(), job, budget).await {
            Offload::Completed(run) => (run, ExecutionPath::Offloaded),
            Offload::Unavailable(reason) => {
                tracing::debug!(action_id = action.id(), %reason, "running action inline");
                (
                    attempt(Arc::clone(action), context.clone(), user_id.to_string()).await,
                    ExecutionPath::Inline,
                )
            }
            Offload::Abandoned(reason) => {
                tracing::warn!(action_id = action.id(), %reason, "offloaded action abandoned");
                // attempt 自行捕获 panic，这里只可能是超时被中止
                let run = Attempt {
                    outcome: Err(ActionFailure::Timeout(budget.as_millis() as u64)),
                    attempts: started.load(Ordering::Acquire),
                };
                (run, ExecutionPath::Offloaded)
            }
        }
    }

    /// 至少覆盖全部重试各自的超时，再加调度余量
    fn offload_budget(&self, options: &ActionOptions) -> Duration {
        let retries = u64::from(options.retry_count.max(1));
        let needed = options
            .timeout_ms
            .saturating_mul(retries)
            .saturating_add(OFFLOAD_MARGIN_MS);
        self.workers.offload_timeout().max(Duration::from_millis(needed))
    }

    async fn record(&self, result: ActionResult) {
        let mut history = self.history.lock().await;
        history.push_front(result);
        history.truncate(self.config.history_capacity);
    }

    /// 结果回灌：学习器记录每个结果；成功时写入记忆并做一次奖励学习；最后调整同类型触发器的灵敏度
    async fn feedback(&self, user_id: &str, context: &Context, result: &ActionResult) {
        let time_block = context
            .time_block
            .clone()
            .unwrap_or_else(|| DayPeriod::from_hour(result.timestamp.hour()).to_string());
        let mut interaction = Interaction::new("autonomous_action", result.timestamp)
            .with_action_type(result.action_type.clone())
            .with_time_block(time_block)
            .with_success(result.success);
        interaction.focus = context.focus.clone();
        interaction.energy = context.energy.clone();
        interaction.urgency = context.urgency.clone();
        if !self.learner.learn_from_interaction(user_id, interaction).await {
            tracing::warn!(user_id, action_id = %result.action_id, "action result not learned");
        }

        if result.success {
            self.learn_success(user_id, context, result).await;
        }

        self.adjust_sensitivity(&result.action_type).await;
    }

    async fn learn_success(&self, user_id: &str, context: &Context, result: &ActionResult) {
        let store = self.learner.store();
        let value = json!({
            "actionType": result.action_type,
            "title": result.title,
            "result": result.result,
            "durationMs": result.duration_ms,
        });
        if !store
            .remember_behavior(user_id, ACTION_OUTCOME_CATEGORY, &result.action_id, value, 1.0)
            .await
        {
            tracing::warn!(user_id, action_id = %result.action_id, "failed to persist action outcome");
        }

        let window = self.agent.config().history_window;
        let (before, after) = {
            let history = self.history.lock().await;
            // 当前结果位于队首；before 不含它
            let recent: Vec<Value> = history
                .iter()
                .take(window + 1)
                .map(|r| json!({ "actionType": r.action_type, "success": r.success }))
                .collect();
            let chronological = |skip: usize| -> Vec<Value> {
                recent.iter().skip(skip).rev().cloned().collect()
            };
            (chronological(1), chronological(0))
        };
        let interface = json!({
            "actionId": result.action_id,
            "actionType": result.action_type,
            "title": result.title,
        });
        let user_context = serde_json::to_value(context.snapshot()).unwrap_or(Value::Null);
        let state = VisualState::new(interface.clone(), user_context.clone(), before, window);
        let next_state = VisualState::new(interface, user_context, after, window);

        let timeout_ms = self
            .actions
            .read()
            .await
            .get(&result.action_id)
            .map(|a| a.options().timeout_ms);
        let outcome = Outcome {
            action_type: result.action_type.clone(),
            feedback: Feedback {
                positive: true,
                ..Feedback::default()
            },
            tasks_total: 1,
            tasks_completed: 1,
            expected_ms: timeout_ms,
            actual_ms: Some(result.duration_ms),
        };
        let reward = self.agent.reward(&outcome, &state);
        self.agent
            .learn_from_example(user_id, &state, &result.action_type, reward.total, Some(&next_state))
            .await;
    }

    /// 回看最近同类型结果：成功多于失败则 ×1.1，否则 ×0.9
    async fn adjust_sensitivity(&self, action_type: &str) {
        let (successes, failures) = {
            let history = self.history.lock().await;
            history
                .iter()
                .filter(|r| r.action_type == action_type)
                .take(self.config.feedback_window)
                .fold((0usize, 0usize), |(s, f), r| if r.success { (s + 1, f) } else { (s, f + 1) })
        };
        let factor = if successes > failures {
            SENSITIVITY_UP
        } else {
            SENSITIVITY_DOWN
        };

        let bound: HashSet<String> = self
            .actions
            .read()
            .await
            .values()
            .filter(|a| a.action_type() == action_type)
            .map(|a| a.id().to_string())
            .collect();
        let mut triggers = self.triggers.write().await;
        for trigger in triggers.iter_mut().filter(|t| bound.contains(&t.action_id)) {
            let s = trigger.adjust_sensitivity(factor, self.config.min_sensitivity, self.config.max_sensitivity);
            tracing::debug!(trigger_id = %trigger.id, sensitivity = s, successes, failures, "sensitivity adjusted");
        }
    }

    // ---------- 查询 ----------

    /// 最近的动作结果，最新在前
    pub async fn get_action_history(&self, limit: usize) -> Vec<ActionResult> {
        self.history.lock().await.iter().take(limit).cloned().collect()
    }

    pub async fn get_trigger_stats(&self) -> Vec<TriggerStats> {
        self.triggers.read().await.iter().map(Trigger::stats).collect()
    }
}
