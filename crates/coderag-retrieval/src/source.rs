use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::RetrievalError;
use crate::indexer::IndexOperation;
use crate::types::{RetrievalResult, SourceKind};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a source is asked. `query` and `entities` drive retrieval; the
/// remaining fields only matter to the indexer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub query: String,
    pub entities: Vec<String>,
    pub repo_url: Option<String>,
    pub index_operation: Option<IndexOperation>,
}

impl RetrievalRequest {
    #[must_use]
    pub fn new(query: impl Into<String>, entities: Vec<String>) -> Self {
        Self {
            query: query.into(),
            entities,
            ..Self::default()
        }
    }

    /// Entity names to look up, falling back to the raw query when none were extracted.
    #[must_use]
    pub fn lookup_names(&self) -> Vec<&str> {
        if self.entities.is_empty() {
            let q = self.query.trim();
            if q.is_empty() { Vec::new() } else { vec![q] }
        } else {
            self.entities.iter().map(String::as_str).collect()
        }
    }
}

/// Uniform retrieval contract. Implementations return either a ranked result
/// or exactly one `RetrievalError`, and must finish within `budget`.
pub trait RetrievalSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrievalRequest,
        budget: Duration,
    ) -> BoxFuture<'a, Result<RetrievalResult, RetrievalError>>;
}

/// Bound `fut` by `budget`, mapping expiry to `RetrievalError::Timeout`.
///
/// # Errors
///
/// Returns the inner error, or `Timeout` if the budget elapses first.
pub async fn with_budget<F>(
    kind: SourceKind,
    budget: Duration,
    fut: F,
) -> Result<RetrievalResult, RetrievalError>
where
    F: Future<Output = Result<RetrievalResult, RetrievalError>>,
{
    tokio::time::timeout(budget, fut)
        .await
        .unwrap_or(Err(RetrievalError::Timeout { kind, budget }))
}
