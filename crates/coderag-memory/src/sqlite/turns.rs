use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::{SessionId, Turn, TurnId, TurnRole, now_rfc3339, parse_session_id, parse_timestamp};

type TurnRow = (i64, String, i64, String, String, String, String);

fn turn_from_row(row: TurnRow) -> Result<Turn, MemoryError> {
    let (id, session_id, turn_number, role, content, metadata, created_at) = row;
    Ok(Turn {
        id: TurnId(id),
        session_id: parse_session_id(&session_id)?,
        turn_number,
        role: role.parse()?,
        content,
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

impl SqliteStore {
    /// Append a turn, assigning the next turn number for the session.
    ///
    /// Number assignment and insert happen in one statement, so two writers can
    /// never observe the same maximum. The `(session_id, turn_number)` unique key
    /// rejects anything that slips past.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (including a missing session).
    pub async fn insert_turn(
        &self,
        session_id: SessionId,
        role: TurnRole,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<Turn, MemoryError> {
        let created_at = now_rfc3339();
        let metadata_json = serde_json::to_string(metadata)?;

        let (id, turn_number): (i64, i64) = sqlx::query_as(
            "INSERT INTO turns (session_id, turn_number, role, content, metadata, created_at) \
             SELECT ?1, COALESCE(MAX(turn_number), 0) + 1, ?2, ?3, ?4, ?5 \
             FROM turns WHERE session_id = ?1 \
             RETURNING id, turn_number",
        )
        .bind(session_id.to_string())
        .bind(role.as_str())
        .bind(content)
        .bind(&metadata_json)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Turn {
            id: TurnId(id),
            session_id,
            turn_number,
            role,
            content: content.to_owned(),
            metadata: metadata.clone(),
            created_at: parse_timestamp(&created_at)?,
        })
    }

    /// Load up to `limit` turns, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn recent_turns(
        &self,
        session_id: SessionId,
        limit: u32,
    ) -> Result<Vec<Turn>, MemoryError> {
        let rows: Vec<TurnRow> = sqlx::query_as(
            "SELECT id, session_id, turn_number, role, content, metadata, created_at \
             FROM turns WHERE session_id = ? ORDER BY turn_number DESC LIMIT ?",
        )
        .bind(session_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }

    /// Number of turns recorded for a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_turns(&self, session_id: SessionId) -> Result<i64, MemoryError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM turns WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn store_with_session() -> (SqliteStore, SessionId) {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let session = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap();
        (store, session.id)
    }

    #[tokio::test]
    async fn turn_numbers_start_at_one_and_increase() {
        let (store, sid) = store_with_session().await;
        let a = store
            .insert_turn(sid, TurnRole::User, "q1", &json!({}))
            .await
            .unwrap();
        let b = store
            .insert_turn(sid, TurnRole::Assistant, "a1", &json!({}))
            .await
            .unwrap();
        assert_eq!(a.turn_number, 1);
        assert_eq!(b.turn_number, 2);
    }

    #[tokio::test]
    async fn turn_numbers_are_per_session() {
        let (store, first) = store_with_session().await;
        let second = store
            .create_session("bob", serde_json::Map::new())
            .await
            .unwrap()
            .id;

        store
            .insert_turn(first, TurnRole::User, "q", &json!({}))
            .await
            .unwrap();
        let t = store
            .insert_turn(second, TurnRole::User, "q", &json!({}))
            .await
            .unwrap();
        assert_eq!(t.turn_number, 1);
    }

    #[tokio::test]
    async fn insert_into_missing_session_fails() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let err = store
            .insert_turn(SessionId::new(), TurnRole::User, "q", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Sqlite(_)));
    }

    #[tokio::test]
    async fn recent_turns_most_recent_first_and_limited() {
        let (store, sid) = store_with_session().await;
        for i in 0..5 {
            store
                .insert_turn(sid, TurnRole::User, &format!("q{i}"), &json!({"i": i}))
                .await
                .unwrap();
        }

        let turns = store.recent_turns(sid, 3).await.unwrap();
        let numbers: Vec<i64> = turns.iter().map(|t| t.turn_number).collect();
        assert_eq!(numbers, vec![5, 4, 3]);
        assert_eq!(turns[0].content, "q4");
        assert_eq!(turns[0].metadata, json!({"i": 4}));
    }

    #[tokio::test]
    async fn concurrent_inserts_on_file_db_have_no_gaps() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = SqliteStore::new(file.path().to_str().unwrap())
            .await
            .unwrap();
        let sid = store
            .create_session("alice", serde_json::Map::new())
            .await
            .unwrap()
            .id;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_turn(sid, TurnRole::User, &format!("q{i}"), &json!({}))
                    .await
                    .unwrap()
                    .turn_number
            }));
        }
        let mut numbers = Vec::new();
        for h in handles {
            numbers.push(h.await.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=16).collect::<Vec<_>>());
        assert_eq!(store.count_turns(sid).await.unwrap(), 16);
    }
}
