use std::time::Duration;

use crate::types::SourceKind;

/// The two ways a retrieval source may fail. Neither is fatal to a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalError {
    #[error("{kind} timed out after {}ms", budget.as_millis())]
    Timeout { kind: SourceKind, budget: Duration },

    #[error("{kind} failed: {message}")]
    Failed { kind: SourceKind, message: String },
}

impl RetrievalError {
    #[must_use]
    pub fn failed(kind: SourceKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Timeout { kind, .. } | Self::Failed { kind, .. } => *kind,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_timeout() {
        let err = RetrievalError::Timeout {
            kind: SourceKind::Analysis,
            budget: Duration::from_millis(2500),
        };
        assert_eq!(err.to_string(), "analysis timed out after 2500ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn display_failed() {
        let err = RetrievalError::failed(SourceKind::Graph, "connection refused");
        assert_eq!(err.to_string(), "graph failed: connection refused");
        assert_eq!(err.kind(), SourceKind::Graph);
        assert!(!err.is_timeout());
    }
}
