use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentError;
use crate::error::RetrievalError;
use crate::source::{BoxFuture, RetrievalRequest, RetrievalSource, with_budget};
use crate::types::{Provenance, RetrievalResult, SourceItem, SourceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub language: Option<String>,
    pub content: String,
    /// Cosine similarity reported by the index, expected in `[0, 1]`.
    pub similarity: f32,
}

pub trait VectorBackend: Send + Sync {
    fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> impl Future<Output = Result<Vec<VectorChunk>, AgentError>> + Send;
}

/// Second-pass relevance scoring (e.g. a cross-encoder).
pub trait Reranker: Send + Sync {
    /// One score in `[0, 1]` per passage, same order.
    fn rerank(
        &self,
        query: &str,
        passages: &[&str],
    ) -> impl Future<Output = Result<Vec<f32>, AgentError>> + Send;
}

/// Placeholder for a retriever built without a re-ranking pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReranker;

impl Reranker for NoReranker {
    async fn rerank(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>, AgentError> {
        Ok(vec![0.0; passages.len()])
    }
}

pub const DEFAULT_RERANK_WEIGHT: f32 = 0.7;

/// Blend similarity with a re-rank score: `w * rerank + (1 - w) * similarity`.
#[must_use]
pub fn blend(similarity: f32, rerank: f32, weight: f32) -> f32 {
    weight * rerank + (1.0 - weight) * similarity
}

pub struct VectorRetriever<B, R = NoReranker> {
    backend: B,
    reranker: Option<R>,
    top_k: usize,
    rerank_weight: f32,
}

impl<B: VectorBackend> VectorRetriever<B> {
    #[must_use]
    pub fn new(backend: B, top_k: usize) -> Self {
        Self {
            backend,
            reranker: None,
            top_k: top_k.max(1),
            rerank_weight: DEFAULT_RERANK_WEIGHT,
        }
    }
}

impl<B: VectorBackend, R: Reranker> VectorRetriever<B, R> {
    #[must_use]
    pub fn with_reranker<R2: Reranker>(self, reranker: R2, weight: f32) -> VectorRetriever<B, R2> {
        VectorRetriever {
            backend: self.backend,
            reranker: Some(reranker),
            top_k: self.top_k,
            rerank_weight: weight.clamp(0.0, 1.0),
        }
    }

    async fn rerank_scores(&self, query: &str, chunks: &[VectorChunk]) -> Option<Vec<f32>> {
        let reranker = self.reranker.as_ref()?;
        let passages: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        match reranker.rerank(query, &passages).await {
            Ok(scores) if scores.len() == chunks.len() => Some(scores),
            Ok(scores) => {
                tracing::warn!(
                    source = "vector",
                    expected = chunks.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores, using similarity only"
                );
                None
            }
            Err(e) => {
                tracing::warn!(source = "vector", "rerank failed, using similarity only: {e}");
                None
            }
        }
    }

    async fn collect(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        let chunks = self
            .backend
            .search(&request.query, self.top_k)
            .await
            .map_err(|e| RetrievalError::failed(SourceKind::Vector, e.to_string()))?;

        let mut tools_used = vec!["semantic_search".to_string()];
        let reranked = self.rerank_scores(&request.query, &chunks).await;
        if reranked.is_some() {
            tools_used.push("rerank".into());
        }

        let items = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let score = match &reranked {
                    Some(scores) => blend(chunk.similarity, scores[i], self.rerank_weight),
                    None => chunk.similarity,
                };
                let provenance = Provenance::file(
                    SourceKind::Vector,
                    chunk.file_path,
                    chunk.start_line,
                    chunk.end_line,
                );
                SourceItem::new(provenance, chunk.content, score)
            })
            .collect();

        Ok(RetrievalResult::ranked(SourceKind::Vector, items, tools_used))
    }
}

impl<B: VectorBackend, R: Reranker> RetrievalSource for VectorRetriever<B, R> {
    fn kind(&self) -> SourceKind {
        SourceKind::Vector
    }

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrievalRequest,
        budget: Duration,
    ) -> BoxFuture<'a, Result<RetrievalResult, RetrievalError>> {
        Box::pin(with_budget(SourceKind::Vector, budget, self.collect(request)))
    }
}
