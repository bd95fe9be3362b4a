use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::TurnCache;
use crate::error::MemoryError;
use crate::sqlite::SqliteStore;
use crate::types::{
    AgentResponse, AgentResponseId, NewAgentResponse, Session, SessionId, Turn, TurnId, TurnRole,
};

/// Conversation memory: durable `SQLite` log with a read-through, write-through hot cache.
///
/// Appends to one session are serialized; appends to different sessions proceed
/// independently. Cache failures are logged and never surface to callers.
pub struct ConversationStore {
    durable: SqliteStore,
    cache: Arc<dyn TurnCache>,
    append_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("durable", &self.durable)
            .finish_non_exhaustive()
    }
}

impl ConversationStore {
    #[must_use]
    pub fn new(durable: SqliteStore, cache: Arc<dyn TurnCache>) -> Self {
        Self {
            durable,
            cache,
            append_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn durable(&self) -> &SqliteStore {
        &self.durable
    }

    fn session_lock(&self, id: SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .append_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    /// Drop the session's lock entry once no other task holds or waits on it.
    fn release_lock(&self, id: SessionId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .append_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = locks.get(&id)
            && Arc::ptr_eq(entry, lock)
            && Arc::strong_count(lock) == 2
        {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.append_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Create a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable store rejects the insert.
    pub async fn create_session(
        &self,
        user_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Session, MemoryError> {
        let session = self.durable.create_session(user_id, metadata).await?;
        if let Err(e) = self.cache.fill(session.id, &[], true) {
            tracing::warn!(session_id = %session.id, "cache prime failed: {e}");
        }
        tracing::debug!(session_id = %session.id, user_id, "session created");
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns an error if the durable store cannot be queried.
    pub async fn session(&self, id: SessionId) -> Result<Option<Session>, MemoryError> {
        self.durable.session(id).await
    }

    /// Append a turn to an open session and return it with its assigned number.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` or `SessionClosed` for unusable sessions, or a
    /// storage error if the durable write fails.
    pub async fn append_turn(
        &self,
        session_id: SessionId,
        role: TurnRole,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<Turn, MemoryError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(session_id, role, content, &metadata).await
        };
        self.release_lock(session_id, &lock);
        result
    }

    async fn append_locked(
        &self,
        session_id: SessionId,
        role: TurnRole,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<Turn, MemoryError> {
        let session = self
            .durable
            .session(session_id)
            .await?
            .ok_or(MemoryError::SessionNotFound(session_id))?;
        if session.is_closed() {
            return Err(MemoryError::SessionClosed(session_id));
        }

        let turn = self
            .durable
            .insert_turn(session_id, role, content, metadata)
            .await?;

        if let Err(e) = self.cache.append(session_id, &turn) {
            tracing::warn!(%session_id, "cache append failed: {e}");
            self.cache.invalidate(session_id);
        }
        Ok(turn)
    }

    /// Up to `max_turns` most recent turns, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache misses and the durable store cannot be read.
    pub async fn recent_context(
        &self,
        session_id: SessionId,
        max_turns: usize,
    ) -> Result<Vec<Turn>, MemoryError> {
        if max_turns == 0 {
            return Ok(Vec::new());
        }
        if let Some(turns) = self.cache.recent(session_id, max_turns) {
            tracing::trace!(%session_id, count = turns.len(), "context served from cache");
            return Ok(turns);
        }

        // Refill under the append lock so a concurrent append cannot land
        // between the durable read and the cache fill.
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.refill_locked(session_id, max_turns).await
        };
        self.release_lock(session_id, &lock);
        result
    }

    async fn refill_locked(
        &self,
        session_id: SessionId,
        max_turns: usize,
    ) -> Result<Vec<Turn>, MemoryError> {
        if let Some(turns) = self.cache.recent(session_id, max_turns) {
            return Ok(turns);
        }
        let limit = u32::try_from(max_turns).unwrap_or(u32::MAX);
        let turns = self.durable.recent_turns(session_id, limit).await?;
        let complete = turns.len() < max_turns;
        if let Err(e) = self.cache.fill(session_id, &turns, complete) {
            tracing::warn!(%session_id, "cache fill failed: {e}");
        }
        Ok(turns)
    }

    /// Close a session. Later appends are rejected; history stays readable.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session does not exist.
    pub async fn close_session(&self, session_id: SessionId) -> Result<Session, MemoryError> {
        let lock = self.session_lock(session_id);
        let closed = {
            let _guard = lock.lock().await;
            let closed = self.durable.close_session(session_id).await;
            self.cache.invalidate(session_id);
            closed
        };
        self.release_lock(session_id, &lock);
        let session = closed?;
        tracing::debug!(%session_id, "session closed");
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record_agent_response(
        &self,
        turn_id: TurnId,
        response: &NewAgentResponse,
    ) -> Result<AgentResponseId, MemoryError> {
        self.durable.insert_agent_response(turn_id, response).await
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn agent_responses(&self, turn_id: TurnId) -> Result<Vec<AgentResponse>, MemoryError> {
        self.durable.agent_responses(turn_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::{CacheError, InMemoryTurnCache};
    use crate::cache::tests::BrokenCache;

    async fn store_with(cache: Arc<dyn TurnCache>) -> ConversationStore {
        let durable = SqliteStore::new(":memory:").await.unwrap();
        ConversationStore::new(durable, cache)
    }

    async fn store() -> ConversationStore {
        store_with(Arc::new(InMemoryTurnCache::new(Duration::from_secs(60), 50))).await
    }

    #[tokio::test]
    async fn append_then_recent_context() {
        let store = store().await;
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;

        store
            .append_turn(sid, TurnRole::User, "q1", json!({}))
            .await
            .unwrap();
        store
            .append_turn(sid, TurnRole::Assistant, "a1", json!({"intent": "search"}))
            .await
            .unwrap();

        let ctx = store.recent_context(sid, 10).await.unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].content, "a1");
        assert_eq!(ctx[1].turn_number, 1);
    }

    #[tokio::test]
    async fn cache_and_durable_agree() {
        let store = store().await;
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;
        for i in 0..4 {
            store
                .append_turn(sid, TurnRole::User, &format!("q{i}"), json!({}))
                .await
                .unwrap();
        }

        let cached = store.recent_context(sid, 3).await.unwrap();
        let durable = store.durable().recent_turns(sid, 3).await.unwrap();
        assert_eq!(cached, durable);
    }

    #[tokio::test]
    async fn zero_max_turns_is_empty() {
        let store = store().await;
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;
        store
            .append_turn(sid, TurnRole::User, "q", json!({}))
            .await
            .unwrap();
        assert!(store.recent_context(sid, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_to_unknown_session_fails() {
        let store = store().await;
        let err = store
            .append_turn(SessionId::new(), TurnRole::User, "q", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn append_to_closed_session_fails_but_history_readable() {
        let store = store().await;
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;
        store
            .append_turn(sid, TurnRole::User, "q", json!({}))
            .await
            .unwrap();
        store.close_session(sid).await.unwrap();

        let err = store
            .append_turn(sid, TurnRole::Assistant, "late", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::SessionClosed(_)));
        assert_eq!(store.recent_context(sid, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broken_cache_does_not_fail_operations() {
        let store = store_with(Arc::new(BrokenCache)).await;
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;
        store
            .append_turn(sid, TurnRole::User, "q", json!({}))
            .await
            .unwrap();

        let ctx = store.recent_context(sid, 5).await.unwrap();
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx[0].content, "q");
    }

    #[tokio::test]
    async fn recent_context_after_cache_expiry_reads_durable() {
        let store = store_with(Arc::new(InMemoryTurnCache::new(
            Duration::from_millis(10),
            50,
        )))
        .await;
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;
        store
            .append_turn(sid, TurnRole::User, "q", json!({}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let ctx = store.recent_context(sid, 5).await.unwrap();
        assert_eq!(ctx.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_totally_ordered() {
        let store = Arc::new(store().await);
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store
                    .append_turn(sid, TurnRole::User, &format!("q{i}"), json!({}))
                    .await
                    .unwrap()
                    .turn_number
            });
        }
        let mut numbers = Vec::new();
        while let Some(n) = tasks.join_next().await {
            numbers.push(n.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());

        let ctx = store.recent_context(sid, 20).await.unwrap();
        let ordered: Vec<i64> = ctx.iter().rev().map(|t| t.turn_number).collect();
        assert_eq!(ordered, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn agent_responses_roundtrip_through_store() {
        let store = store().await;
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;
        let turn = store
            .append_turn(sid, TurnRole::Assistant, "a", json!({}))
            .await
            .unwrap();
        store
            .record_agent_response(
                turn.id,
                &NewAgentResponse {
                    source_name: "analysis".into(),
                    tools_used: vec!["analyze_function".into()],
                    result: json!({"items": 1}),
                    duration_ms: 40,
                },
            )
            .await
            .unwrap();

        let rows = store.agent_responses(turn.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_name, "analysis");
    }

    /// Delays `fill` so a concurrent append can land while a refill is pending.
    struct SlowFillCache {
        inner: InMemoryTurnCache,
        delay: Duration,
    }

    impl TurnCache for SlowFillCache {
        fn recent(&self, session: SessionId, max_turns: usize) -> Option<Vec<Turn>> {
            self.inner.recent(session, max_turns)
        }

        fn fill(&self, session: SessionId, turns: &[Turn], complete: bool) -> Result<(), CacheError> {
            std::thread::sleep(self.delay);
            self.inner.fill(session, turns, complete)
        }

        fn append(&self, session: SessionId, turn: &Turn) -> Result<(), CacheError> {
            self.inner.append(session, turn)
        }

        fn invalidate(&self, session: SessionId) {
            self.inner.invalidate(session);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn append_during_cache_refill_is_not_lost() {
        let cache = Arc::new(SlowFillCache {
            inner: InMemoryTurnCache::new(Duration::from_secs(60), 50),
            delay: Duration::from_millis(300),
        });
        let store = Arc::new(store_with(Arc::clone(&cache) as Arc<dyn TurnCache>).await);
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;
        store
            .append_turn(sid, TurnRole::User, "q1", json!({}))
            .await
            .unwrap();
        cache.invalidate(sid);

        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.recent_context(sid, 10).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .append_turn(sid, TurnRole::Assistant, "a1", json!({}))
            .await
            .unwrap();
        reader.await.unwrap().unwrap();

        let served: Vec<i64> = store
            .recent_context(sid, 10)
            .await
            .unwrap()
            .iter()
            .map(|t| t.turn_number)
            .collect();
        let durable: Vec<i64> = store
            .durable()
            .recent_turns(sid, 10)
            .await
            .unwrap()
            .iter()
            .map(|t| t.turn_number)
            .collect();
        assert_eq!(durable, vec![2, 1]);
        assert_eq!(served, durable);
    }

    #[tokio::test]
    async fn idle_session_locks_are_released() {
        let store = store().await;
        for _ in 0..3 {
            let sid = store
                .create_session("alice", serde_json::Map::new())
                .await
                .unwrap()
                .id;
            store
                .append_turn(sid, TurnRole::User, "q", json!({}))
                .await
                .unwrap();
            store.recent_context(sid, 5).await.unwrap();
        }
        store
            .append_turn(SessionId::new(), TurnRole::User, "q", json!({}))
            .await
            .unwrap_err();
        assert_eq!(store.lock_entries(), 0);
    }
}

