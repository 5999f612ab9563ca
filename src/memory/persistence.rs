//! 用户记忆持久化
//!
//! 以 user_id 为键读写一份 JSON 文档。默认实现为每用户一个文件；内存实现用于测试与嵌入场景。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::EngineError;

/// 持久化后端：按 user_id 读写 JSON 文档
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// 读取文档；不存在时返回 None
    async fn read(&self, user_id: &str) -> Result<Option<String>, EngineError>;

    /// 覆盖写入文档
    async fn write(&self, user_id: &str, document: &str) -> Result<(), EngineError>;

    /// 后端名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 文件后端：`<dir>/user_<hex(user_id)>.json`
///
/// 文件名对 user_id 做十六进制编码，可逆且不同 id 不会落到同一文件。
#[derive(Debug)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// 打开（必要时创建）存储目录；目录不可用属于启动期致命错误
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            EngineError::Persistence(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir
            .join(format!("user_{}.json", encode_user_id(user_id)))
    }
}

#[async_trait]
impl MemoryBackend for JsonFileBackend {
    async fn read(&self, user_id: &str) -> Result<Option<String>, EngineError> {
        let path = self.path_for(user_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, user_id: &str, document: &str) -> Result<(), EngineError> {
        let path = self.path_for(user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // 先写临时文件再 rename，避免半截文档
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, document).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "json-file"
    }
}

/// 内存后端
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    documents: RwLock<HashMap<String, String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn read(&self, user_id: &str) -> Result<Option<String>, EngineError> {
        Ok(self.documents.read().await.get(user_id).cloned())
    }

    async fn write(&self, user_id: &str, document: &str) -> Result<(), EngineError> {
        self.documents
            .write()
            .await
            .insert(user_id.to_string(), document.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// 把 user_id 编码为文件名安全的十六进制串
fn encode_user_id(user_id: &str) -> String {
    hex::encode(user_id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_user_id_is_reversible() {
        assert_eq!(encode_user_id("bob"), "626f62");
        assert_ne!(encode_user_id("alice@corp"), encode_user_id("alice.corp"));
        let encoded = encode_user_id("../etc/passwd");
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hex::decode(encoded).unwrap(), b"../etc/passwd");
    }

    #[tokio::test]
    async fn test_file_backend_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::open(dir.path().join("nested")).unwrap();

        assert!(backend.read("alice").await.unwrap().is_none());

        backend.write("alice", r#"{"a":1}"#).await.unwrap();
        assert_eq!(
            backend.read("alice").await.unwrap().as_deref(),
            Some(r#"{"a":1}"#)
        );
        assert!(backend.path_for("alice").exists());
        assert!(!backend.path_for("alice").with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_in_memory_backend_isolates_users() {
        let backend = InMemoryBackend::new();
        backend.write("a", "1").await.unwrap();
        backend.write("b", "2").await.unwrap();
        assert_eq!(backend.read("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(backend.read("b").await.unwrap().as_deref(), Some("2"));
        assert!(backend.read("c").await.unwrap().is_none());
    }
}
