//! Cadence - 自适应行为学习守护进程
//!
//! 入口：加载配置、初始化日志，组装记忆存储、学习器、预测引擎、奖励学习智能体与触发调度器，
//! 注册一个示例的专注提醒触发器后运行，直到 Ctrl+C。
//!
//! 运行方式：
//! ```bash
//! CADENCE_USER=alice cargo run -- config/local.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use serde_json::json;

use cadence::config::load_config;
use cadence::core::TaskScheduler;
use cadence::memory::{Energy, Focus, JsonFileBackend};
use cadence::prediction::PredictionContext;
use cadence::trigger::{Context, FnAction, StaticContextProvider, Trigger, TriggerPriority};
use cadence::{MemoryStore, PatternLearner, PredictionEngine, RlvrAgent, TriggerScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cadence::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    let user_id = std::env::var("CADENCE_USER").unwrap_or_else(|_| "default".to_string());

    // 持久化目录不可用是唯一的致命错误
    let backend = JsonFileBackend::open(&cfg.memory.data_dir).with_context(|| {
        format!("Memory directory {} is not usable", cfg.memory.data_dir.display())
    })?;
    let store = Arc::new(MemoryStore::new(Arc::new(backend), cfg.memory.clone().into()));
    let learner = Arc::new(PatternLearner::new(store.clone(), cfg.learning.clone().into()));
    let predictions = PredictionEngine::new(store.clone());
    let agent = Arc::new(RlvrAgent::new(cfg.rlvr.clone().into()).with_store(store.clone()));
    let workers = Arc::new(TaskScheduler::from(&cfg.scheduler));

    let provider = Arc::new(StaticContextProvider::new(
        Context::default()
            .with_focus(Focus::DeepWork)
            .with_energy(Energy::High),
    ));
    let scheduler = Arc::new(TriggerScheduler::new(
        cfg.scheduler.clone().into(),
        provider,
        workers,
        learner.clone(),
        agent,
    ));

    scheduler
        .add_action(Arc::new(FnAction::new(
            "focus-reminder",
            "reminder",
            "Protect your focus block",
            |ctx: Context, user: String| async move {
                let energy = ctx.energy.map(|e| e.to_string()).unwrap_or_default();
                Ok(json!({
                    "user": user,
                    "message": format!("Deep work in progress ({} energy); notifications held", energy),
                }))
            },
        )))
        .await;
    scheduler
        .add_trigger(Trigger::new(
            "deep-work-focus",
            "focus-reminder",
            TriggerPriority::Medium,
            |ctx: &Context| ctx.focus == Some(Focus::DeepWork),
        ))
        .await
        .context("Failed to register sample trigger")?;

    let insights = learner.insights(&user_id).await;
    tracing::info!(
        user_id = %user_id,
        interactions = insights.interaction_count,
        circadian = %insights.circadian_type,
        "loaded user memory"
    );
    let now = PredictionContext::new(Utc::now()).with_action_type("reminder");
    for rec in predictions.generate_personalized_recommendations(&user_id, &now).await {
        tracing::info!(priority = ?rec.priority, title = %rec.title, "{}", rec.message);
    }

    scheduler.start(user_id.clone()).await;

    // 每小时清理过期记录并回收空闲缓存
    let maintenance = {
        let learner = learner.clone();
        let store = store.clone();
        let user_id = user_id.clone();
        let prune_days = cfg.memory.prune_days;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                learner.prune(&user_id, prune_days, Utc::now()).await;
                store.evict_idle().await;
            }
        })
    };
    tracing::info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Shutting down scheduler...");
    scheduler.stop().await;
    maintenance.abort();
    let fired = scheduler.get_action_history(usize::MAX).await.len();
    tracing::info!(user_id = %user_id, fired, "scheduler stopped");

    Ok(())
}
