//! 外部上下文及其提供方

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::core::EngineError;
use crate::memory::{Energy, Focus, Urgency, SCHEMA_VERSION};

/// 某一时刻的用户上下文；未识别的字段保留在 `extra`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Context {
    pub schema_version: u32,
    pub urgency: Option<Urgency>,
    pub focus: Option<Focus>,
    pub energy: Option<Energy>,
    pub time_block: Option<String>,
    pub upcoming_events: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            urgency: None,
            focus: None,
            energy: None,
            time_block: None,
            upcoming_events: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl Context {
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

    pub fn with_time_block(mut self, time_block: impl Into<String>) -> Self {
        self.time_block = Some(time_block.into());
        self
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            urgency: self.urgency.clone(),
            focus: self.focus.clone(),
            energy: self.energy.clone(),
        }
    }
}

/// 随动作结果保存的上下文摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub urgency: Option<Urgency>,
    pub focus: Option<Focus>,
    pub energy: Option<Energy>,
}

/// 上下文提供方（日历、设备状态等外部系统）
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn get_context(&self, user_id: &str) -> Result<Context, EngineError>;
}

/// 返回固定上下文，可随时替换
#[derive(Default)]
pub struct StaticContextProvider {
    context: RwLock<Context>,
}

impl StaticContextProvider {
    pub fn new(context: Context) -> Self {
        Self {
            context: RwLock::new(context),
        }
    }

    pub async fn set(&self, context: Context) {
        *self.context.write().await = context;
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn get_context(&self, _user_id: &str) -> Result<Context, EngineError> {
        Ok(self.context.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_kept_in_extra() {
        let json = r#"{"focus":"deep-work","energy":"high","upcomingEvents":[{"title":"standup"}],"location":"office"}"#;
        let ctx: Context = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.schema_version, SCHEMA_VERSION);
        assert_eq!(ctx.focus, Some(Focus::DeepWork));
        assert_eq!(ctx.upcoming_events.len(), 1);
        assert_eq!(ctx.extra.get("location"), Some(&Value::from("office")));
    }

    #[tokio::test]
    async fn test_static_provider_can_be_replaced() {
        let provider = StaticContextProvider::new(Context::default().with_energy(Energy::Low));
        assert_eq!(provider.get_context("u").await.unwrap().energy, Some(Energy::Low));
        provider.set(Context::default().with_energy(Energy::High)).await;
        assert_eq!(provider.get_context("u").await.unwrap().energy, Some(Energy::High));
    }
}
