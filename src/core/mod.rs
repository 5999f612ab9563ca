//! 核心层：错误类型与有界工作池

pub mod error;
pub mod task_scheduler;

pub use error::{EngineError, EngineResult};
pub use task_scheduler::{Offload, TaskKind, TaskScheduler};
