//! 预测层的输入与输出结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{ContextKey, Energy, Focus, StateKey, Urgency};

/// 调用方描述“现在要做什么、处于什么状态”
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionContext {
    pub action_type: Option<String>,
    pub time_block: Option<String>,
    pub focus: Option<Focus>,
    pub energy: Option<Energy>,
    pub urgency: Option<Urgency>,
    pub at: DateTime<Utc>,
}

impl PredictionContext {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            action_type: None,
            time_block: None,
            focus: None,
            energy: None,
            urgency: None,
            at,
        }
    }

    pub fn with_action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    pub fn with_time_block(mut self, time_block: impl Into<String>) -> Self {
        self.time_block = Some(time_block.into());
        self
    }

    pub fn with_focus(mut self, focus: Focus) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn with_energy(mut self, energy: Energy) -> Self {
        self.energy = Some(energy);
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn context_key(&self) -> ContextKey {
        ContextKey {
            time_block: self.time_block.clone(),
            focus: self.focus.clone(),
            energy: self.energy.clone(),
            urgency: self.urgency.clone(),
        }
    }

    pub fn state_key(&self) -> StateKey {
        StateKey {
            context: self.context_key(),
            action_type: self.action_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictedState {
    pub state: StateKey,
    pub probability: f64,
    pub count: usize,
}

/// 下一动作预测；无数据时 confidence 为 0、列表为空
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NextActionPrediction {
    pub predictions: Vec<PredictedState>,
    pub confidence: f64,
    pub sequence_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingSource {
    OptimalHour,
    OptimalTimeBlock,
    OptimalWeekday,
    Circadian,
    ActionSpecific,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingRecommendation {
    pub source: TimingSource,
    pub value: String,
    pub hours: Vec<u32>,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingPrediction {
    pub action_type: String,
    /// 按置信度降序
    pub recommendations: Vec<TimingRecommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessFactor {
    pub name: String,
    pub value: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessPrediction {
    /// 始终在 [0,1]
    pub probability: f64,
    pub confidence: f64,
    pub factors: Vec<SuccessFactor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    Timing,
    SuccessOptimization,
    BehavioralMismatch,
    ProductivityWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub priority: RecommendationPriority,
    pub title: String,
    pub message: String,
    pub confidence: f64,
}
