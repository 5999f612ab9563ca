//! 引擎错误类型
//!
//! 库内部统一返回 `Result<T, EngineError>`；对外不应抛错的边界操作（加载记忆、学习、预测）
//! 在调用点记录日志后转为布尔值或零置信度哨兵对象。

use thiserror::Error;

/// 学习、预测与触发调度过程中可能出现的错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Action execution failed: {0}")]
    ActionFailed(String),

    #[error("Action timeout after {0} ms")]
    ActionTimeout(u64),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    /// 工作池饱和、超时或任务崩溃；调用方应回退到同步路径
    #[error("Offload unavailable: {0}")]
    OffloadUnavailable(String),

    #[error("Unsupported schema version {found} (max {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Context provider error: {0}")]
    Context(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
