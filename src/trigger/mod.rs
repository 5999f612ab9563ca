//! 触发与自治动作：上下文、触发器、动作契约与调度器

pub mod action;
pub mod context;
pub mod scheduler;
pub mod types;

pub use action::{ActionOptions, ActionResult, AutonomousAction, ExecutionPath, FnAction};
pub use context::{Context, ContextProvider, ContextSnapshot, StaticContextProvider};
pub use scheduler::{SchedulerConfig, TriggerScheduler, ACTION_OUTCOME_CATEGORY};
pub use types::{Trigger, TriggerCondition, TriggerPriority, TriggerStats, MAX_SENSITIVITY, MIN_SENSITIVITY};
