use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::{Session, SessionId, now_rfc3339, parse_session_id, parse_timestamp};

type SessionRow = (String, String, String, Option<String>, String);

fn session_from_row(row: SessionRow) -> Result<Session, MemoryError> {
    let (id, user_id, created_at, closed_at, metadata) = row;
    let metadata = match serde_json::from_str(&metadata)? {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(MemoryError::Corrupt(format!(
                "session metadata is not an object: {other}"
            )));
        }
    };
    Ok(Session {
        id: parse_session_id(&id)?,
        user_id,
        created_at: parse_timestamp(&created_at)?,
        closed_at: closed_at.as_deref().map(parse_timestamp).transpose()?,
        metadata,
    })
}

impl SqliteStore {
    /// Create a session with a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_session(
        &self,
        user_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Session, MemoryError> {
        let id = SessionId::new();
        let created_at = now_rfc3339();
        let metadata_json = serde_json::to_string(&metadata)?;

        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, metadata) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(user_id)
        .bind(&created_at)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(Session {
            id,
            user_id: user_id.to_owned(),
            created_at: parse_timestamp(&created_at)?,
            closed_at: None,
            metadata,
        })
    }

    /// Look up a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row cannot be decoded.
    pub async fn session(&self, id: SessionId) -> Result<Option<Session>, MemoryError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, user_id, created_at, closed_at, metadata FROM sessions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    /// Mark a session closed. Closing an already closed session keeps the first timestamp.
    ///
    /// # Errors
    ///
    /// Returns `MemoryError::SessionNotFound` if the session does not exist.
    pub async fn close_session(&self, id: SessionId) -> Result<Session, MemoryError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "UPDATE sessions SET closed_at = COALESCE(closed_at, ?) WHERE id = ? \
             RETURNING id, user_id, created_at, closed_at, metadata",
        )
        .bind(now_rfc3339())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row)
            .transpose()?
            .ok_or(MemoryError::SessionNotFound(id))
    }

    /// Sessions for a user, most recently created first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn sessions_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Session>, MemoryError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT id, user_id, created_at, closed_at, metadata FROM sessions \
             WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(session_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_session() {
        let store = store().await;
        let mut meta = serde_json::Map::new();
        meta.insert("name".into(), "Query: hello".into());

        let created = store.create_session("alice", meta.clone()).await.unwrap();
        let fetched = store.session(created.id).await.unwrap().unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.metadata, meta);
        assert!(!fetched.is_closed());
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let store = store().await;
        assert!(store.session(SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_session_is_idempotent() {
        let store = store().await;
        let created = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap();

        let first = store.close_session(created.id).await.unwrap();
        let second = store.close_session(created.id).await.unwrap();

        assert!(first.is_closed());
        assert_eq!(first.closed_at, second.closed_at);
    }

    #[tokio::test]
    async fn close_unknown_session_errors() {
        let store = store().await;
        let err = store.close_session(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, MemoryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn sessions_for_user_filters_by_user() {
        let store = store().await;
        store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap();
        store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap();
        store
            .create_session("bob", serde_json::Map::new())
            .await
            .unwrap();

        let alice = store.sessions_for_user("alice", 10).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|s| s.user_id == "alice"));
    }
}
