//! 单样本奖励学习智能体
//!
//! 每个带奖励的样本立即做一次表格更新，并追加到有界经验缓冲区。
//! 策略表与经验缓冲区由同一把锁保护，多用户并发反馈时更新按顺序生效。

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::policy::QTable;
use super::reward::{compute_reward, Outcome, RewardSignal};
use super::state::{EncodedState, VisualState};
use crate::config::RlvrSection;
use crate::memory::MemoryStore;

/// 学习到的行为写入记忆时使用的类别
pub const RLVR_CATEGORY: &str = "rlvr";

#[derive(Debug, Clone)]
pub struct RlvrConfig {
    pub alpha: f64,
    pub gamma: f64,
    pub epsilon: f64,
    pub experience_capacity: usize,
    /// 视觉状态保留的历史条数
    pub history_window: usize,
}

impl Default for RlvrConfig {
    fn default() -> Self {
        Self {
            alpha: 0.001,
            gamma: 0.95,
            epsilon: 0.1,
            experience_capacity: 1000,
            history_window: 10,
        }
    }
}

impl From<RlvrSection> for RlvrConfig {
    fn from(section: RlvrSection) -> Self {
        Self {
            alpha: section.alpha.clamp(0.0, 1.0),
            gamma: section.gamma.clamp(0.0, 1.0),
            epsilon: section.epsilon.clamp(0.0, 1.0),
            experience_capacity: section.experience_capacity,
            history_window: section.history_window,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    pub state: EncodedState,
    pub action: String,
    pub reward: f64,
    pub next_state: Option<EncodedState>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct AgentState {
    policy: QTable,
    experiences: VecDeque<Experience>,
}

pub struct RlvrAgent {
    config: RlvrConfig,
    state: Mutex<AgentState>,
    store: Option<Arc<MemoryStore>>,
}

impl RlvrAgent {
    pub fn new(config: RlvrConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AgentState::default()),
            store: None,
        }
    }

    /// 学习结果同时写入用户记忆
    pub fn with_store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &RlvrConfig {
        &self.config
    }

    pub fn reward(&self, outcome: &Outcome, state: &VisualState) -> RewardSignal {
        compute_reward(outcome, state)
    }

    /// 单样本更新，返回更新后的 Q(s,a)
    pub async fn learn_from_example(
        &self,
        user_id: &str,
        state: &VisualState,
        action: &str,
        reward: f64,
        next_state: Option<&VisualState>,
    ) -> f64 {
        let encoded = state.encode();
        let next = next_state.map(VisualState::encode);

        let q = {
            let mut guard = self.state.lock().await;
            let q = guard.policy.update(
                &encoded,
                action,
                reward,
                next.as_ref(),
                self.config.alpha,
                self.config.gamma,
            );
            guard.experiences.push_back(Experience {
                state: encoded,
                action: action.to_string(),
                reward,
                next_state: next,
                timestamp: Utc::now(),
            });
            while guard.experiences.len() > self.config.experience_capacity {
                guard.experiences.pop_front();
            }
            q
        };

        tracing::debug!(user_id, action, reward, q, "rlvr update");

        if let Some(store) = &self.store {
            let value = json!({ "reward": reward, "qValue": q });
            if !store
                .remember_behavior(user_id, RLVR_CATEGORY, action, value, reward)
                .await
            {
                tracing::warn!(user_id, action, "failed to persist rlvr outcome");
            }
        }
        q
    }

    /// ε-贪心选择；候选为空时返回 None
    pub async fn get_best_action(&self, state: &VisualState, candidates: &[String]) -> Option<String> {
        let encoded = state.encode();
        let guard = self.state.lock().await;
        let mut rng = rand::thread_rng();
        select(&guard.policy, &encoded, candidates, self.config.epsilon, &mut rng)
    }

    pub async fn q_value(&self, state: &VisualState, action: &str) -> f64 {
        self.state.lock().await.policy.get(&state.encode(), action)
    }

    pub async fn policy_size(&self) -> usize {
        self.state.lock().await.policy.len()
    }

    /// 最近的经验，最新在前
    pub async fn recent_experiences(&self, limit: usize) -> Vec<Experience> {
        self.state
            .lock()
            .await
            .experiences
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn experience_count(&self) -> usize {
        self.state.lock().await.experiences.len()
    }
}

fn select<R: Rng>(
    policy: &QTable,
    state: &EncodedState,
    candidates: &[String],
    epsilon: f64,
    rng: &mut R,
) -> Option<String> {
    let first = candidates.first()?;
    if policy.is_empty() {
        return Some(first.clone());
    }
    if rng.gen_bool(epsilon.clamp(0.0, 1.0)) {
        return candidates.choose(rng).cloned();
    }
    policy.best_of(state, candidates).cloned()
}
