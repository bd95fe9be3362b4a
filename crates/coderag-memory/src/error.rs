use crate::types::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session is closed: {0}")]
    SessionClosed(SessionId),

    #[error("invalid turn role: {0}")]
    InvalidRole(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl MemoryError {
    /// Whether the durable store itself could not be reached or written.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::Migration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_errors_are_unavailable() {
        let err = MemoryError::Sqlite(sqlx::Error::PoolTimedOut);
        assert!(err.is_unavailable());
    }

    #[test]
    fn domain_errors_are_not_unavailable() {
        let id = SessionId::new();
        assert!(!MemoryError::SessionNotFound(id).is_unavailable());
        assert!(!MemoryError::SessionClosed(id).is_unavailable());
        assert!(!MemoryError::InvalidRole("system".into()).is_unavailable());
    }
}
