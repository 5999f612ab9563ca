//! 模式学习：表现分、昼夜节律、行为偏好、成功模式、上下文表现、转移表

pub mod circadian;
pub mod learner;
pub mod patterns;
pub mod performance;
pub mod predictive;

pub use circadian::learn_time_patterns;
pub use learner::{relearn, LearningConfig, PatternLearner, UserInsights};
pub use patterns::{learn_behavioral_preferences, learn_context_patterns, learn_success_patterns};
pub use performance::performance_score;
pub use predictive::learn_predictive_patterns;
