use coderag_memory::{MemoryError, SessionId};

use crate::intent::Intent;

/// Request-level aborts. Everything else degrades into a lesser answer.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] MemoryError),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session is closed: {0}")]
    SessionClosed(SessionId),

    #[error("no configured retrieval source can serve intent {0}")]
    NoRoute(Intent),

    #[error("query is empty")]
    EmptyQuery,
}

impl From<MemoryError> for OrchestratorError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::SessionNotFound(id) => Self::SessionNotFound(id),
            MemoryError::SessionClosed(id) => Self::SessionClosed(id),
            other => Self::StorageUnavailable(other),
        }
    }
}
