use super::SqliteStore;
use crate::error::MemoryError;
use crate::types::{AgentResponse, AgentResponseId, NewAgentResponse, TurnId, now_rfc3339, parse_timestamp};

type ResponseRow = (i64, i64, String, String, String, i64, String);

fn response_from_row(row: ResponseRow) -> Result<AgentResponse, MemoryError> {
    let (id, turn_id, source_name, tools_used, result, duration_ms, created_at) = row;
    Ok(AgentResponse {
        id: AgentResponseId(id),
        turn_id: TurnId(turn_id),
        source_name,
        tools_used: serde_json::from_str(&tools_used)?,
        result: serde_json::from_str(&result)?,
        duration_ms: u64::try_from(duration_ms).unwrap_or(0),
        created_at: parse_timestamp(&created_at)?,
    })
}

impl SqliteStore {
    /// Record one source's contribution to a turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_agent_response(
        &self,
        turn_id: TurnId,
        response: &NewAgentResponse,
    ) -> Result<AgentResponseId, MemoryError> {
        let tools_used = serde_json::to_string(&response.tools_used)?;
        let result = serde_json::to_string(&response.result)?;
        let duration_ms = i64::try_from(response.duration_ms).unwrap_or(i64::MAX);

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO agent_responses \
             (turn_id, source_name, tools_used, result, duration_ms, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(turn_id)
        .bind(&response.source_name)
        .bind(&tools_used)
        .bind(&result)
        .bind(duration_ms)
        .bind(now_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(AgentResponseId(row.0))
    }

    /// All agent responses recorded for a turn, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn agent_responses(
        &self,
        turn_id: TurnId,
    ) -> Result<Vec<AgentResponse>, MemoryError> {
        let rows: Vec<ResponseRow> = sqlx::query_as(
            "SELECT id, turn_id, source_name, tools_used, result, duration_ms, created_at \
             FROM agent_responses WHERE turn_id = ? ORDER BY id ASC",
        )
        .bind(turn_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(response_from_row).collect()
    }
}
