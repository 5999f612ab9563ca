//! 预测层：基于已学习模式的只读推断

pub mod engine;
pub mod types;

pub use engine::{
    next_action_from, recommendations_from, success_from, timing_from, PredictionEngine,
};
pub use types::*;
