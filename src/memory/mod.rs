//! 记忆层：数据模型、持久化后端、按用户隔离的记忆存储

pub mod persistence;
pub mod types;
pub mod user_memory;

pub use persistence::{InMemoryBackend, JsonFileBackend, MemoryBackend};
pub use types::*;
pub use user_memory::{MemoryConfig, MemoryStore};
