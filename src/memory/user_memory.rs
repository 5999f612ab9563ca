//! 用户隔离的持久记忆
//!
//! 每个用户一份 `UserMemory`，首次写入时从后端加载（读取或解析失败则用默认值），
//! 之后缓存在内存中。每个用户的记忆由独立的 Mutex 保护，所有“读-改-写”都在锁内完成，
//! 并发的学习与反馈不会互相覆盖。只读访问不进入缓存；已落盘且无人持有的条目可被 `evict_idle` 回收。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use super::persistence::MemoryBackend;
use super::types::{LearnedBehavior, Patterns, Preferences, UserMemory};
use crate::config::MemorySection;

/// 记忆存储配置
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// 交互日志上限
    pub max_interactions: usize,
    /// Prune 默认天数
    pub prune_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_interactions: 1000,
            prune_days: 90,
        }
    }
}

impl From<MemorySection> for MemoryConfig {
    fn from(section: MemorySection) -> Self {
        Self {
            max_interactions: section.max_interactions.max(1),
            prune_days: section.prune_days,
        }
    }
}

/// 缓存条目；`dirty` 表示内存中有尚未落盘的修改
struct Slot {
    memory: UserMemory,
    dirty: bool,
}

/// 记忆存储
pub struct MemoryStore {
    backend: Arc<dyn MemoryBackend>,
    config: MemoryConfig,
    /// user_id -> 记忆
    memories: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl MemoryStore {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: MemoryConfig) -> Self {
        Self {
            backend,
            config,
            memories: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// 已缓存的句柄
    async fn cached(&self, user_id: &str) -> Option<Arc<Mutex<Slot>>> {
        self.memories.read().await.get(user_id).map(Arc::clone)
    }

    /// 获取或创建用户记忆句柄
    async fn handle(&self, user_id: &str) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.cached(user_id).await {
            return slot;
        }

        let mut memories = self.memories.write().await;
        if let Some(slot) = memories.get(user_id) {
            return Arc::clone(slot);
        }

        let slot = Arc::new(Mutex::new(Slot {
            memory: self.read_durable(user_id).await,
            dirty: false,
        }));
        memories.insert(user_id.to_string(), Arc::clone(&slot));
        slot
    }

    /// 从后端读取；任何失败都视为“没有历史记忆”
    async fn read_durable(&self, user_id: &str) -> UserMemory {
        match self.backend.read(user_id).await {
            Ok(Some(data)) => match serde_json::from_str::<UserMemory>(&data) {
                Ok(memory) if memory.user_id == user_id => memory,
                Ok(memory) => {
                    tracing::warn!(
                        user_id,
                        stored = %memory.user_id,
                        "memory document belongs to another user, starting fresh"
                    );
                    UserMemory::new(user_id)
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "memory document unreadable, starting fresh");
                    UserMemory::new(user_id)
                }
            },
            Ok(None) => UserMemory::new(user_id),
            Err(e) => {
                tracing::warn!(user_id, backend = self.backend.name(), error = %e, "memory load failed, starting fresh");
                UserMemory::new(user_id)
            }
        }
    }

    /// 序列化并写入后端；失败只返回 false，内存状态保留并标记为未落盘
    async fn persist(&self, slot: &mut Slot) -> bool {
        let memory = &mut slot.memory;
        memory.timestamp = Utc::now();
        let document = match serde_json::to_string(memory) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(user_id = %memory.user_id, error = %e, "memory serialization failed");
                slot.dirty = true;
                return false;
            }
        };
        let saved = match self.backend.write(&memory.user_id, &document).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(user_id = %memory.user_id, backend = self.backend.name(), error = %e, "memory save failed");
                false
            }
        };
        slot.dirty = !saved;
        saved
    }

    /// 加载用户记忆（快照）；从不报错
    ///
    /// 未缓存的用户直接读后端，不创建缓存条目。
    pub async fn load(&self, user_id: &str) -> UserMemory {
        match self.cached(user_id).await {
            Some(slot) => slot.lock().await.memory.clone(),
            None => self.read_durable(user_id).await,
        }
    }

    /// 用给定快照替换并持久化
    pub async fn save(&self, memory: UserMemory) -> bool {
        let handle = self.handle(&memory.user_id).await;
        let mut slot = handle.lock().await;
        slot.memory = memory;
        self.persist(&mut slot).await
    }

    /// 在用户锁内执行一次“读-改-写”，返回闭包结果与保存是否成功
    pub async fn update<R>(&self, user_id: &str, f: impl FnOnce(&mut UserMemory) -> R) -> (R, bool) {
        let handle = self.handle(user_id).await;
        let mut slot = handle.lock().await;
        let out = f(&mut slot.memory);
        let saved = self.persist(&mut slot).await;
        (out, saved)
    }

    /// 删除早于 `now - days_old` 的交互与学习行为，然后保存
    ///
    /// 删除了交互时，基于旧日志的模式一并清空，等待下一次学习重建。
    pub async fn prune(&self, user_id: &str, days_old: i64, now: DateTime<Utc>) -> bool {
        let cutoff = now - Duration::days(days_old);
        let ((interactions, behaviors), saved) = self
            .update(user_id, |memory| {
                let removed = prune_entries(memory, cutoff);
                if removed.0 > 0 {
                    memory.patterns = Patterns::default();
                }
                removed
            })
            .await;
        tracing::info!(user_id, days_old, interactions, behaviors, "pruned memory");
        saved
    }

    /// 按配置的默认天数清理
    pub async fn prune_default(&self, user_id: &str) -> bool {
        self.prune(user_id, self.config.prune_days, Utc::now()).await
    }

    /// 记住一条行为（category/key 覆盖写）
    pub async fn remember_behavior(
        &self,
        user_id: &str,
        category: &str,
        key: &str,
        value: serde_json::Value,
        confidence: f64,
    ) -> bool {
        let behavior = LearnedBehavior {
            value,
            timestamp: Utc::now(),
            confidence: if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 },
        };
        let ((), saved) = self
            .update(user_id, |memory| {
                memory
                    .learned_behaviors
                    .entry(category.to_string())
                    .or_default()
                    .insert(key.to_string(), behavior);
            })
            .await;
        saved
    }

    pub async fn recall_behavior(&self, user_id: &str, category: &str, key: &str) -> Option<LearnedBehavior> {
        match self.cached(user_id).await {
            Some(slot) => slot.lock().await.memory.behavior(category, key).cloned(),
            None => self.read_durable(user_id).await.behavior(category, key).cloned(),
        }
    }

    pub async fn update_preferences(&self, user_id: &str, preferences: Preferences) -> bool {
        let ((), saved) = self
            .update(user_id, |memory| memory.preferences = preferences)
            .await;
        saved
    }

    /// 已缓存的用户数
    pub async fn active_users(&self) -> usize {
        self.memories.read().await.len()
    }

    /// 回收已落盘、且没有其他任务持有的缓存条目，返回回收数量
    pub async fn evict_idle(&self) -> usize {
        let mut memories = self.memories.write().await;
        let before = memories.len();
        memories.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard.dirty,
                Err(_) => true,
            }
        });
        let evicted = before - memories.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = memories.len(), "evicted idle memories");
        }
        evicted
    }
}

/// 按截止时间删除交互与学习行为，返回（交互数, 行为数）
pub(crate) fn prune_entries(memory: &mut UserMemory, cutoff: DateTime<Utc>) -> (usize, usize) {
    let before = memory.interactions.len();
    memory.interactions.retain(|i| i.timestamp >= cutoff);

    let mut removed = 0;
    for entries in memory.learned_behaviors.values_mut() {
        let n = entries.len();
        entries.retain(|_, b| b.timestamp >= cutoff);
        removed += n - entries.len();
    }
    memory.learned_behaviors.retain(|_, entries| !entries.is_empty());

    (before - memory.interactions.len(), removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EngineError;
    use crate::memory::persistence::{InMemoryBackend, JsonFileBackend};
    use crate::memory::types::Interaction;
    use async_trait::async_trait;

    struct BrokenBackend;

    #[async_trait]
    impl MemoryBackend for BrokenBackend {
        async fn read(&self, _user_id: &str) -> Result<Option<String>, EngineError> {
            Err(EngineError::Persistence("disk on fire".into()))
        }

        async fn write(&self, _user_id: &str, _document: &str) -> Result<(), EngineError> {
            Err(EngineError::Persistence("disk on fire".into()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(InMemoryBackend::new()), MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_load_returns_default_without_caching() {
        let store = store();
        let memory = store.load("alice").await;
        assert_eq!(memory.user_id, "alice");
        assert!(memory.interactions.is_empty());
        assert!(store.recall_behavior("alice", "c", "k").await.is_none());
        assert_eq!(store.active_users().await, 0);

        assert!(store.remember_behavior("alice", "c", "k", serde_json::json!(1), 1.0).await);
        assert_eq!(store.active_users().await, 1);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_unsaved_state() {
        let store = store();
        for i in 0..20 {
            let user = format!("reader{}", i);
            store.load(&user).await;
        }
        assert_eq!(store.active_users().await, 0);

        assert!(store.remember_behavior("hal", "c", "k", serde_json::json!("v"), 1.0).await);
        assert_eq!(store.evict_idle().await, 1);
        assert_eq!(store.active_users().await, 0);
        // 回收后从后端重新读回
        assert!(store.recall_behavior("hal", "c", "k").await.is_some());

        let broken = MemoryStore::new(Arc::new(BrokenBackend), MemoryConfig::default());
        assert!(!broken.remember_behavior("ivy", "c", "k", serde_json::json!(1), 1.0).await);
        assert_eq!(broken.evict_idle().await, 0);
        assert!(broken.recall_behavior("ivy", "c", "k").await.is_some());
    }

    #[tokio::test]
    async fn test_document_of_other_user_is_not_adopted() {
        let backend = Arc::new(InMemoryBackend::new());
        let other = serde_json::to_string(&UserMemory::new("alice@corp")).unwrap();
        backend.write("alice.corp", &other).await.unwrap();
        let store = MemoryStore::new(backend, MemoryConfig::default());
        let memory = store.load("alice.corp").await;
        assert_eq!(memory.user_id, "alice.corp");
    }

    #[tokio::test]
    async fn test_similar_ids_do_not_share_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = MemoryStore::new(
                Arc::new(JsonFileBackend::open(dir.path()).unwrap()),
                MemoryConfig::default(),
            );
            assert!(
                store
                    .remember_behavior("alice@corp", "notes", "k", serde_json::json!("alice-only"), 1.0)
                    .await
            );
        }
        let store = MemoryStore::new(
            Arc::new(JsonFileBackend::open(dir.path()).unwrap()),
            MemoryConfig::default(),
        );
        assert!(store.recall_behavior("alice.corp", "notes", "k").await.is_none());
        assert!(store.recall_behavior("alice@corp", "notes", "k").await.is_some());
    }

    #[tokio::test]
    async fn test_read_failure_yields_default_and_write_failure_reports_false() {
        let store = MemoryStore::new(Arc::new(BrokenBackend), MemoryConfig::default());
        let memory = store.load("bob").await;
        assert!(memory.interactions.is_empty());

        assert!(!store.remember_behavior("bob", "c", "k", serde_json::json!(1), 0.5).await);
        // 写入失败时内存状态保留
        assert!(store.recall_behavior("bob", "c", "k").await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_document_yields_default() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.write("carol", "{not json").await.unwrap();
        let store = MemoryStore::new(backend, MemoryConfig::default());
        assert_eq!(store.load("carol").await.user_id, "carol");
    }

    #[tokio::test]
    async fn test_save_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = MemoryStore::new(
                Arc::new(JsonFileBackend::open(dir.path()).unwrap()),
                MemoryConfig::default(),
            );
            let mut memory = store.load("dave").await;
            memory.push_interaction(Interaction::new("task", Utc::now()), 1000);
            assert!(store.save(memory).await);
        }
        let store = MemoryStore::new(
            Arc::new(JsonFileBackend::open(dir.path()).unwrap()),
            MemoryConfig::default(),
        );
        assert_eq!(store.load("dave").await.interactions.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_drops_old_entries() {
        let store = store();
        let now = Utc::now();
        let (_, saved) = store
            .update("erin", |m| {
                m.push_interaction(Interaction::new("old", now - Duration::days(120)), 1000);
                m.push_interaction(Interaction::new("new", now - Duration::days(1)), 1000);
                m.learned_behaviors.entry("cat".into()).or_default().insert(
                    "stale".into(),
                    LearnedBehavior {
                        value: serde_json::json!(true),
                        timestamp: now - Duration::days(200),
                        confidence: 1.0,
                    },
                );
            })
            .await;
        assert!(saved);

        store
            .update("erin", |m| m.patterns.time_blocks.total = 2)
            .await;

        assert!(store.prune("erin", 90, now).await);
        let memory = store.load("erin").await;
        assert_eq!(memory.interactions.len(), 1);
        assert_eq!(memory.interactions[0].kind, "new");
        assert!(memory.learned_behaviors.is_empty());
        // 基于旧日志的模式被清空
        assert_eq!(memory.patterns, Patterns::default());
    }

    #[tokio::test]
    async fn test_remember_behavior_clamps_confidence() {
        let store = store();
        assert!(store.remember_behavior("fay", "timing", "standup", serde_json::json!("09:00"), 3.0).await);
        let b = store.recall_behavior("fay", "timing", "standup").await.unwrap();
        assert_eq!(b.confidence, 1.0);
        assert_eq!(b.value, serde_json::json!("09:00"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .update("gus", move |m| {
                        m.push_interaction(Interaction::new(format!("t{}", i), Utc::now()), 1000)
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.load("gus").await.interactions.len(), 50);
    }
}
