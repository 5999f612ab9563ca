//! Cadence - Rust 自适应行为学习引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、有界工作池与同步回退
//! - **memory**: 用户记忆模型、持久化后端、按用户串行化的记忆存储
//! - **learning**: 表现分、节律/行为/成功/上下文/转移五类模式学习
//! - **prediction**: 下一动作、最佳时机、成功概率与个性化建议
//! - **rlvr**: 视觉状态编码、奖励函数、Q 表与单样本学习智能体
//! - **trigger**: 上下文、触发器、自治动作与触发调度器
//! - **observability**: tracing 初始化

pub mod config;
pub mod core;
pub mod learning;
pub mod memory;
pub mod observability;
pub mod prediction;
pub mod rlvr;
pub mod trigger;

pub use learning::PatternLearner;
pub use memory::MemoryStore;
pub use prediction::PredictionEngine;
pub use rlvr::RlvrAgent;
pub use trigger::TriggerScheduler;
