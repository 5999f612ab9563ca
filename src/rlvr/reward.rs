//! 奖励函数
//!
//! total = 0.4·满意度 + 0.3·完成度 + 0.2·效率 + 0.1·新颖度

use serde::{Deserialize, Serialize};

use super::state::VisualState;

const SATISFACTION_WEIGHT: f64 = 0.4;
const COMPLETION_WEIGHT: f64 = 0.3;
const EFFICIENCY_WEIGHT: f64 = 0.2;
const NOVELTY_WEIGHT: f64 = 0.1;
const NOVELTY_BONUS: f64 = 0.2;

/// 显式反馈标记
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feedback {
    pub positive: bool,
    pub negative: bool,
    pub helpful: bool,
    pub efficient: bool,
}

impl Feedback {
    pub fn satisfaction(&self) -> f64 {
        let mut s: f64 = 0.0;
        if self.positive {
            s += 0.5;
        }
        if self.negative {
            s -= 0.5;
        }
        if self.helpful {
            s += 0.3;
        }
        if self.efficient {
            s += 0.2;
        }
        s.clamp(-1.0, 1.0)
    }
}

/// 一次动作的可观测结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Outcome {
    pub action_type: String,
    pub feedback: Feedback,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub expected_ms: Option<u64>,
    pub actual_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardSignal {
    pub satisfaction: f64,
    pub completion: f64,
    pub efficiency: f64,
    pub novelty: f64,
    pub total: f64,
}

pub fn compute_reward(outcome: &Outcome, state: &VisualState) -> RewardSignal {
    let satisfaction = outcome.feedback.satisfaction();

    let completion = if outcome.tasks_total == 0 {
        0.0
    } else {
        (outcome.tasks_completed as f64 / outcome.tasks_total as f64).clamp(0.0, 1.0)
    };

    let efficiency = match (outcome.expected_ms, outcome.actual_ms) {
        (Some(expected), Some(actual)) if expected > 0 => {
            ((expected as f64 - actual as f64) / expected as f64).clamp(0.0, 1.0)
        }
        _ => 0.0,
    };

    let novelty = if state.has_seen_action(&outcome.action_type) {
        0.0
    } else {
        NOVELTY_BONUS
    };

    RewardSignal {
        satisfaction,
        completion,
        efficiency,
        novelty,
        total: SATISFACTION_WEIGHT * satisfaction
            + COMPLETION_WEIGHT * completion
            + EFFICIENCY_WEIGHT * efficiency
            + NOVELTY_WEIGHT * novelty,
    }
}
