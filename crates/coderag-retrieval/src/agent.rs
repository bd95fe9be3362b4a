//! HTTP client for the specialised agents (graph, analysis, vector, indexer).
//!
//! Every agent exposes `POST /execute?tool_name=<tool>` taking a JSON argument
//! object and answering with a `{success, data, error}` envelope.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::analysis::{AnalysisBackend, FunctionAnalysis};
use crate::graph::{GraphBackend, GraphEntity, GraphNeighborhood, RelatedEntity};
use crate::indexer::{IndexStatus, IndexerBackend};
use crate::vector::{Reranker, VectorBackend, VectorChunk};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid agent url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("agent rejected {tool}: {message}")]
    Rejected { tool: String, message: String },

    #[error("malformed agent response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct AgentClient {
    client: reqwest::Client,
    endpoint: Url,
    repo_id: String,
    branch: String,
}

impl fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("repo_id", &self.repo_id)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

impl AgentClient {
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .user_agent(concat!("coderag/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(base_url, client)
    }

    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL.
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self, AgentError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            endpoint: base.join("execute")?,
            repo_id: "default".into(),
            branch: "main".into(),
        })
    }

    #[must_use]
    pub fn with_repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = repo_id.into();
        self
    }

    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Invoke one tool and return the envelope's `data` (JSON `null` when absent).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or `success = false`.
    pub async fn execute(&self, tool: &str, args: &Value) -> Result<Value, AgentError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("tool_name", tool);

        tracing::debug!(tool, endpoint = %self.endpoint, "agent tool call");
        let response = self.client.post(url).json(args).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(AgentError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let envelope: Envelope = serde_json::from_str(&text)?;
        if !envelope.success {
            return Err(AgentError::Rejected {
                tool: tool.to_owned(),
                message: envelope.error.unwrap_or_else(|| "unknown error".into()),
            });
        }
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    async fn execute_as<T: DeserializeOwned>(
        &self,
        tool: &str,
        args: &Value,
    ) -> Result<Option<T>, AgentError> {
        let data = self.execute(tool, args).await?;
        if data.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(data)?))
    }
}

#[derive(Deserialize)]
struct EntityPayload {
    name: String,
    #[serde(default, rename = "type")]
    entity_type: Option<String>,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
}

impl From<EntityPayload> for GraphEntity {
    fn from(p: EntityPayload) -> Self {
        Self {
            name: p.name,
            entity_type: p.entity_type,
            properties: p.properties,
        }
    }
}

#[derive(Deserialize)]
struct RelatedPayload {
    #[serde(flatten)]
    entity: EntityPayload,
    #[serde(default)]
    relationship: Option<String>,
}

#[derive(Deserialize)]
struct RelatedList {
    #[serde(default)]
    related: Vec<RelatedPayload>,
}

#[derive(Deserialize)]
struct SearchPayload {
    #[serde(default)]
    chunks: Vec<ChunkPayload>,
}

#[derive(Deserialize)]
struct ChunkPayload {
    chunk_id: String,
    file_path: String,
    #[serde(default)]
    start_line: Option<u32>,
    #[serde(default)]
    end_line: Option<u32>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    preview: String,
    #[serde(default)]
    relevance_score: f32,
}

impl GraphBackend for AgentClient {
    async fn neighborhood(
        &self,
        entity_name: &str,
        relationship: Option<&str>,
    ) -> Result<GraphNeighborhood, AgentError> {
        let focus = self
            .execute_as::<EntityPayload>("find_entity", &json!({ "name": entity_name }))
            .await?
            .map(GraphEntity::from);

        let mut args = json!({ "entity_name": entity_name, "direction": "both" });
        if let Some(rel) = relationship {
            args["relationship_type"] = json!(rel);
        }
        let related = self
            .execute_as::<RelatedList>("find_related", &args)
            .await?
            .map(|list| {
                list.related
                    .into_iter()
                    .map(|r| RelatedEntity {
                        relationship: r.relationship.or_else(|| relationship.map(str::to_owned)),
                        entity: r.entity.into(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(GraphNeighborhood { focus, related })
    }
}

impl AnalysisBackend for AgentClient {
    async fn analyze(&self, name: &str) -> Result<Option<FunctionAnalysis>, AgentError> {
        self.execute_as("analyze_function", &json!({ "name": name }))
            .await
    }
}

impl VectorBackend for AgentClient {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<VectorChunk>, AgentError> {
        let payload = self
            .execute_as::<SearchPayload>(
                "semantic_search",
                &json!({ "query": query, "repo_id": self.repo_id, "top_k": top_k }),
            )
            .await?;
        Ok(payload
            .map(|p| {
                p.chunks
                    .into_iter()
                    .map(|c| VectorChunk {
                        chunk_id: c.chunk_id,
                        file_path: c.file_path,
                        start_line: c.start_line,
                        end_line: c.end_line,
                        language: c.language,
                        content: c.preview,
                        similarity: c.relevance_score,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct RerankPayload {
    scores: Vec<f32>,
}

impl Reranker for AgentClient {
    async fn rerank(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, AgentError> {
        let payload = self
            .execute_as::<RerankPayload>("rerank", &json!({ "query": query, "passages": passages }))
            .await?;
        Ok(payload.map(|p| p.scores).unwrap_or_default())
    }
}

impl IndexerBackend for AgentClient {
    async fn index_repository(&self, repo_url: &str) -> Result<Value, AgentError> {
        self.execute(
            "index_repository",
            &json!({ "repo_url": repo_url, "branch": self.branch }),
        )
        .await
    }

    async fn embed_repository(&self, repo_url: &str) -> Result<Value, AgentError> {
        self.execute(
            "embed_repository",
            &json!({ "repo_url": repo_url, "repo_id": self.repo_id, "branch": self.branch }),
        )
        .await
    }

    async fn index_status(&self) -> Result<IndexStatus, AgentError> {
        Ok(self
            .execute_as("get_index_status", &json!({}))
            .await?
            .unwrap_or_default())
    }
}
