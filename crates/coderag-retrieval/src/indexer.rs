use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentError;
use crate::error::RetrievalError;
use crate::source::{BoxFuture, RetrievalRequest, RetrievalSource, with_budget};
use crate::types::{Provenance, RetrievalResult, SourceItem, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOperation {
    Index,
    Embed,
    Stats,
}

impl IndexOperation {
    #[must_use]
    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Index => "index_repository",
            Self::Embed => "embed_repository",
            Self::Stats => "get_index_status",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub statistics: serde_json::Value,
}

pub trait IndexerBackend: Send + Sync {
    fn index_repository(
        &self,
        repo_url: &str,
    ) -> impl Future<Output = Result<serde_json::Value, AgentError>> + Send;

    fn embed_repository(
        &self,
        repo_url: &str,
    ) -> impl Future<Output = Result<serde_json::Value, AgentError>> + Send;

    fn index_status(&self) -> impl Future<Output = Result<IndexStatus, AgentError>> + Send;
}

/// Triggers indexing work or reports index statistics.
///
/// Not a retrieval in the usual sense: the result is a single status item.
pub struct IndexerSource<B> {
    backend: B,
}

impl<B: IndexerBackend> IndexerSource<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    async fn run(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        let op = request.index_operation.unwrap_or(IndexOperation::Stats);
        let fail = |e: AgentError| RetrievalError::failed(SourceKind::Indexer, e.to_string());

        let content = match op {
            IndexOperation::Stats => {
                let status = self.backend.index_status().await.map_err(fail)?;
                format!(
                    "Index status: {}\nStatistics: {}",
                    if status.status.is_empty() {
                        "unknown"
                    } else {
                        status.status.as_str()
                    },
                    status.statistics
                )
            }
            IndexOperation::Index | IndexOperation::Embed => {
                let repo_url = request.repo_url.as_deref().ok_or_else(|| {
                    RetrievalError::failed(SourceKind::Indexer, "no repository url in request")
                })?;
                let data = if op == IndexOperation::Index {
                    self.backend.index_repository(repo_url).await
                } else {
                    self.backend.embed_repository(repo_url).await
                }
                .map_err(fail)?;
                tracing::info!(operation = op.tool_name(), repo_url, "indexer accepted request");
                format!("{} started for {repo_url}: {data}", op.tool_name())
            }
        };

        Ok(RetrievalResult::ranked(
            SourceKind::Indexer,
            vec![SourceItem::new(
                Provenance::note(SourceKind::Indexer, op.tool_name()),
                content,
                1.0,
            )],
            vec![op.tool_name().to_owned()],
        ))
    }
}

impl<B: IndexerBackend> RetrievalSource for IndexerSource<B> {
    fn kind(&self) -> SourceKind {
        SourceKind::Indexer
    }

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrievalRequest,
        budget: Duration,
    ) -> BoxFuture<'a, Result<RetrievalResult, RetrievalError>> {
        Box::pin(with_budget(SourceKind::Indexer, budget, self.run(request)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct FakeIndexer {
        calls: Mutex<Vec<String>>,
    }

    impl IndexerBackend for FakeIndexer {
        async fn index_repository(&self, repo_url: &str) -> Result<serde_json::Value, AgentError> {
            self.calls.lock().unwrap().push(format!("index {repo_url}"));
            Ok(json!({"job": 1}))
        }

        async fn embed_repository(&self, repo_url: &str) -> Result<serde_json::Value, AgentError> {
            self.calls.lock().unwrap().push(format!("embed {repo_url}"));
            Ok(json!({"job": 2}))
        }

        async fn index_status(&self) -> Result<IndexStatus, AgentError> {
            self.calls.lock().unwrap().push("status".into());
            Ok(IndexStatus {
                status: "ready".into(),
                statistics: json!({"files": 3}),
            })
        }
    }

    #[tokio::test]
    async fn defaults_to_stats() {
        let source = IndexerSource::new(FakeIndexer::default());
        let result = source
            .retrieve(&RetrievalRequest::new("stats", vec![]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.items()[0].content.contains("ready"));
        assert!((result.items()[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn index_uses_repo_url() {
        let backend = FakeIndexer::default();
        let source = IndexerSource::new(backend);
        let req = RetrievalRequest {
            query: "index it".into(),
            repo_url: Some("https://github.com/acme/app".into()),
            index_operation: Some(IndexOperation::Index),
            ..RetrievalRequest::default()
        };
        let result = source.retrieve(&req, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.tools_used(), ["index_repository".to_string()]);
        assert_eq!(
            source.backend.calls.lock().unwrap().as_slice(),
            ["index https://github.com/acme/app".to_string()]
        );
    }

    #[tokio::test]
    async fn embed_without_repo_url_fails() {
        let source = IndexerSource::new(FakeIndexer::default());
        let req = RetrievalRequest {
            index_operation: Some(IndexOperation::Embed),
            ..RetrievalRequest::default()
        };
        let err = source.retrieve(&req, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Failed { kind: SourceKind::Indexer, .. }));
    }
}
