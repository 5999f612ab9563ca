//! 模式学习器
//!
//! 每条新交互追加到用户日志后，按顺序重跑：时间 → 行为 → 成功 → 上下文 →（日志足够长时）转移表，
//! 整个过程在该用户的记忆锁内完成并持久化。

use std::sync::Arc;

use serde::Serialize;

use super::circadian::learn_time_patterns;
use super::patterns::{learn_behavioral_preferences, learn_context_patterns, learn_success_patterns};
use super::predictive::learn_predictive_patterns;
use chrono::{DateTime, Duration, Utc};

use crate::config::LearningSection;
use crate::memory::user_memory::prune_entries;
use crate::memory::{
    BehavioralPreferences, CircadianType, ContextPerformance, Interaction, MemoryStore, Patterns,
    UserMemory, SCHEMA_VERSION,
};

/// 学习参数（节律分类阈值均为经验常数，可配置覆盖）
#[derive(Debug, Clone)]
pub struct LearningConfig {
    pub success_weight: f64,
    pub performance_weight: f64,
    pub frequency_weight: f64,
    /// 四个时段得分极差小于该值视为 balanced
    pub balanced_spread: f64,
    /// 获胜时段需领先对手时段的分数
    pub dominance_margin: f64,
    pub min_interactions: usize,
    pub predictive_min_interactions: usize,
    pub min_context_samples: usize,
    pub top_contexts: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            success_weight: 0.4,
            performance_weight: 0.4,
            frequency_weight: 0.2,
            balanced_spread: 10.0,
            dominance_margin: 5.0,
            min_interactions: 3,
            predictive_min_interactions: 10,
            min_context_samples: 2,
            top_contexts: 5,
        }
    }
}

impl From<LearningSection> for LearningConfig {
    fn from(section: LearningSection) -> Self {
        Self {
            success_weight: section.success_weight,
            performance_weight: section.performance_weight,
            frequency_weight: section.frequency_weight,
            balanced_spread: section.balanced_spread,
            dominance_margin: section.dominance_margin,
            min_interactions: section.min_interactions,
            predictive_min_interactions: section.predictive_min_interactions,
            top_contexts: section.top_contexts,
            ..Self::default()
        }
    }
}

/// 用户画像摘要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInsights {
    pub user_id: String,
    pub interaction_count: usize,
    /// 仅统计结果明确的交互；没有时为 None
    pub success_rate: Option<f64>,
    pub circadian_type: CircadianType,
    pub circadian_confidence: f64,
    pub peak_hours: Vec<u32>,
    pub behavioral_preferences: BehavioralPreferences,
    pub top_contexts: Vec<ContextPerformance>,
    pub transition_count: usize,
    pub learned_behavior_count: usize,
}

pub struct PatternLearner {
    store: Arc<MemoryStore>,
    config: LearningConfig,
}

impl PatternLearner {
    pub fn new(store: Arc<MemoryStore>, config: LearningConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// 记录一条交互并重新学习；返回是否成功持久化
    pub async fn learn_from_interaction(&self, user_id: &str, interaction: Interaction) -> bool {
        if interaction.schema_version > SCHEMA_VERSION {
            tracing::warn!(
                user_id,
                found = interaction.schema_version,
                supported = SCHEMA_VERSION,
                "rejecting interaction with unsupported schema"
            );
            return false;
        }

        let cap = self.store.config().max_interactions;
        let config = self.config.clone();
        let (passes, saved) = self
            .store
            .update(user_id, move |memory| {
                memory.push_interaction(interaction, cap);
                relearn(memory, &config)
            })
            .await;

        tracing::debug!(user_id, passes, saved, "learned from interaction");
        if !saved {
            tracing::warn!(user_id, "patterns updated in memory but not persisted");
        }
        saved
    }

    /// 清理旧记录并基于剩余日志重新学习，保证模式与日志一致
    pub async fn prune(&self, user_id: &str, days_old: i64, now: DateTime<Utc>) -> bool {
        let cutoff = now - Duration::days(days_old);
        let config = self.config.clone();
        let ((interactions, behaviors), saved) = self
            .store
            .update(user_id, move |memory| {
                let removed = prune_entries(memory, cutoff);
                if removed.0 > 0 {
                    memory.patterns = Patterns::default();
                    relearn(memory, &config);
                }
                removed
            })
            .await;
        tracing::info!(user_id, days_old, interactions, behaviors, "pruned and relearned");
        saved
    }

    /// 只读摘要
    pub async fn insights(&self, user_id: &str) -> UserInsights {
        let memory = self.store.load(user_id).await;
        let decided: Vec<bool> = memory.interactions.iter().filter_map(|i| i.success).collect();
        let success_rate = if decided.is_empty() {
            None
        } else {
            Some(decided.iter().filter(|s| **s).count() as f64 / decided.len() as f64)
        };
        let circadian = &memory.patterns.time_blocks.circadian;

        UserInsights {
            user_id: memory.user_id.clone(),
            interaction_count: memory.interactions.len(),
            success_rate,
            circadian_type: circadian.kind,
            circadian_confidence: circadian.confidence,
            peak_hours: circadian.peak_hours.clone(),
            behavioral_preferences: memory.patterns.behavioral_preferences.clone(),
            top_contexts: memory.patterns.optimal_contexts.clone(),
            transition_count: memory.patterns.predictive_patterns.transitions.len(),
            learned_behavior_count: memory.learned_behaviors.values().map(|m| m.len()).sum(),
        }
    }
}

/// 重跑全部学习流程，返回执行的趟数（日志不足 `min_interactions` 时为 0）
pub fn relearn(memory: &mut UserMemory, config: &LearningConfig) -> usize {
    let log = &memory.interactions;
    if log.len() < config.min_interactions {
        return 0;
    }

    let patterns = &mut memory.patterns;
    patterns.time_blocks = learn_time_patterns(log, config);
    patterns.behavioral_preferences = learn_behavioral_preferences(log);
    patterns.success_patterns = learn_success_patterns(log);
    patterns.optimal_contexts =
        learn_context_patterns(log, config.min_context_samples, config.top_contexts);

    if log.len() >= config.predictive_min_interactions {
        patterns.predictive_patterns = learn_predictive_patterns(log);
        5
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Energy, Focus, InMemoryBackend, MemoryConfig};
    use chrono::TimeZone;

    fn learner() -> PatternLearner {
        let store = Arc::new(MemoryStore::new(
            Arc::new(InMemoryBackend::new()),
            MemoryConfig::default(),
        ));
        PatternLearner::new(store, LearningConfig::default())
    }

    fn morning(n: i64) -> Interaction {
        let base = Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap();
        Interaction::new("task", base + Duration::days(n % 5) + Duration::hours(n % 3))
            .with_action_type("write")
            .with_success(true)
            .with_energy(Energy::High)
            .with_focus(Focus::DeepWork)
    }

    #[tokio::test]
    async fn test_patterns_start_after_three_interactions() {
        let learner = learner();
        assert!(learner.learn_from_interaction("u", morning(0)).await);
        assert!(learner.learn_from_interaction("u", morning(1)).await);
        let memory = learner.store().load("u").await;
        assert_eq!(memory.patterns.time_blocks.total, 0);

        assert!(learner.learn_from_interaction("u", morning(2)).await);
        let memory = learner.store().load("u").await;
        assert_eq!(memory.patterns.time_blocks.total, 3);
        assert!(memory.patterns.predictive_patterns.transitions.is_empty());
    }

    #[tokio::test]
    async fn test_predictive_pass_after_ten() {
        let learner = learner();
        for n in 0..10 {
            learner.learn_from_interaction("u", morning(n)).await;
        }
        let memory = learner.store().load("u").await;
        assert_eq!(memory.patterns.predictive_patterns.sequence_count, 9);
        assert!(!memory.patterns.predictive_patterns.transitions.is_empty());
    }

    #[tokio::test]
    async fn test_morning_scenario_via_learner() {
        let learner = learner();
        for n in 0..8 {
            learner.learn_from_interaction("u", morning(n)).await;
        }
        let insights = learner.insights("u").await;
        assert_eq!(insights.circadian_type, CircadianType::MorningPerson);
        assert!(insights.circadian_confidence > 0.5);
        assert_eq!(insights.success_rate, Some(1.0));
        assert_eq!(insights.interaction_count, 8);
    }

    #[tokio::test]
    async fn test_future_schema_rejected() {
        let learner = learner();
        let mut i = morning(0);
        i.schema_version = SCHEMA_VERSION + 1;
        assert!(!learner.learn_from_interaction("u", i).await);
        assert!(learner.store().load("u").await.interactions.is_empty());
    }

    #[tokio::test]
    async fn test_prune_relearns_from_remaining_log() {
        let learner = learner();
        for n in 0..12 {
            learner.learn_from_interaction("u", morning(n)).await;
        }
        let memory = learner.store().load("u").await;
        assert!(!memory.patterns.predictive_patterns.transitions.is_empty());

        // 只保留最近 3 天的交互（少于转移表所需的 10 条）
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        assert!(learner.prune("u", 3, now).await);
        let memory = learner.store().load("u").await;
        let kept = memory.interactions.len();
        assert!(kept >= 3 && kept < 10);
        assert_eq!(memory.patterns.time_blocks.total, kept);
        assert!(memory.patterns.predictive_patterns.transitions.is_empty());

        // 全部过期后模式清空
        let later = now + Duration::days(30);
        assert!(learner.prune("u", 3, later).await);
        let memory = learner.store().load("u").await;
        assert!(memory.interactions.is_empty());
        assert_eq!(memory.patterns, Patterns::default());
    }

    #[tokio::test]
    async fn test_log_is_capped() {
        let store = Arc::new(MemoryStore::new(
            Arc::new(InMemoryBackend::new()),
            MemoryConfig {
                max_interactions: 20,
                ..MemoryConfig::default()
            },
        ));
        let learner = PatternLearner::new(store, LearningConfig::default());
        for n in 0..45 {
            learner.learn_from_interaction("u", morning(n)).await;
        }
        assert_eq!(learner.store().load("u").await.interactions.len(), 20);
    }
}
