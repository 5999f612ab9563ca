//! 触发器：条件 + 绑定动作 + 按优先级的冷却 + 自适应灵敏度
//!
//! 状态只有两种：Idle → (启用 且 条件成立 且 距上次触发 ≥ 调整后冷却) → Fired → Idle。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::context::Context;

pub const MIN_SENSITIVITY: f64 = 0.1;
pub const MAX_SENSITIVITY: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TriggerPriority {
    pub fn base_cooldown(&self) -> Duration {
        match self {
            TriggerPriority::Low => Duration::hours(1),
            TriggerPriority::Medium => Duration::minutes(15),
            TriggerPriority::High => Duration::minutes(5),
            TriggerPriority::Critical => Duration::zero(),
        }
    }
}

/// 触发条件：对上下文的谓词
pub trait TriggerCondition: Send + Sync {
    fn evaluate(&self, context: &Context) -> bool;
}

impl<F> TriggerCondition for F
where
    F: Fn(&Context) -> bool + Send + Sync,
{
    fn evaluate(&self, context: &Context) -> bool {
        self(context)
    }
}

#[derive(Clone)]
pub struct Trigger {
    pub id: String,
    pub action_id: String,
    pub priority: TriggerPriority,
    pub enabled: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub trigger_count: u64,
    /// 灵敏度倍数，始终在 [MIN_SENSITIVITY, MAX_SENSITIVITY]
    pub sensitivity: f64,
    condition: Arc<dyn TriggerCondition>,
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("action_id", &self.action_id)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("last_triggered", &self.last_triggered)
            .field("trigger_count", &self.trigger_count)
            .field("sensitivity", &self.sensitivity)
            .finish()
    }
}

impl Trigger {
    pub fn new(
        id: impl Into<String>,
        action_id: impl Into<String>,
        priority: TriggerPriority,
        condition: impl TriggerCondition + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            action_id: action_id.into(),
            priority,
            enabled: true,
            last_triggered: None,
            trigger_count: 0,
            sensitivity: 1.0,
            condition: Arc::new(condition),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 基础冷却 / 灵敏度
    pub fn adjusted_cooldown(&self) -> Duration {
        let base_ms = self.priority.base_cooldown().num_milliseconds() as f64;
        Duration::milliseconds((base_ms / self.sensitivity).round() as i64)
    }

    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered {
            None => true,
            Some(last) => now - last >= self.adjusted_cooldown(),
        }
    }

    pub fn is_due(&self, context: &Context, now: DateTime<Utc>) -> bool {
        self.enabled && self.cooldown_elapsed(now) && self.condition.evaluate(context)
    }

    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_triggered = Some(now);
        self.trigger_count += 1;
    }

    /// 乘以 factor 后截断到 [min, max]，返回新值
    pub fn adjust_sensitivity(&mut self, factor: f64, min: f64, max: f64) -> f64 {
        let next = self.sensitivity * factor;
        self.sensitivity = if next.is_finite() { next.clamp(min, max) } else { self.sensitivity };
        self.sensitivity
    }

    pub fn stats(&self) -> TriggerStats {
        TriggerStats {
            id: self.id.clone(),
            action_id: self.action_id.clone(),
            priority: self.priority,
            enabled: self.enabled,
            last_triggered: self.last_triggered,
            trigger_count: self.trigger_count,
            sensitivity: self.sensitivity,
            adjusted_cooldown_ms: self.adjusted_cooldown().num_milliseconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStats {
    pub id: String,
    pub action_id: String,
    pub priority: TriggerPriority,
    pub enabled: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub trigger_count: u64,
    pub sensitivity: f64,
    pub adjusted_cooldown_ms: i64,
}
