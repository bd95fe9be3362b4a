use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

fn default_global_budget_ms() -> u64 {
    30_000
}

fn default_per_source_fraction() -> f64 {
    0.8
}

fn default_per_source_floor_ms() -> u64 {
    2_000
}

fn default_context_turns() -> usize {
    5
}

fn default_llm_timeout_ms() -> u64 {
    20_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Wall-clock limit for the retrieval fan-out of one request.
    #[serde(default = "default_global_budget_ms")]
    pub global_budget_ms: u64,
    #[serde(default = "default_per_source_fraction")]
    pub per_source_fraction: f64,
    #[serde(default = "default_per_source_floor_ms")]
    pub per_source_floor_ms: u64,
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
    /// Bound on each classification or synthesis call.
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            global_budget_ms: default_global_budget_ms(),
            per_source_fraction: default_per_source_fraction(),
            per_source_floor_ms: default_per_source_floor_ms(),
            context_turns: default_context_turns(),
            llm_timeout_ms: default_llm_timeout_ms(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn global_budget(&self) -> Duration {
        Duration::from_millis(self.global_budget_ms)
    }

    /// `global * fraction`, raised to the floor, never above the global budget.
    #[must_use]
    pub fn per_source_timeout(&self) -> Duration {
        let global = self.global_budget();
        let scaled = global.mul_f64(self.per_source_fraction.clamp(0.0, 1.0));
        scaled
            .max(Duration::from_millis(self.per_source_floor_ms))
            .min(global)
    }

    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }
}

fn default_top_k() -> usize {
    8
}

fn default_max_item_chars() -> usize {
    1200
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_item_chars")]
    pub max_item_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_item_chars: default_max_item_chars(),
        }
    }
}

fn default_sqlite_path() -> String {
    "./data/coderag.db".into()
}

fn default_cache_ttl_secs() -> u64 {
    86_400
}

fn default_cache_capacity() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Turns kept per session in the hot cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl MemoryConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Mock,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Read from `CODERAG_LLM_API_KEY` only, never from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            api_key: None,
        }
    }
}

fn default_graph_url() -> Option<String> {
    Some("http://localhost:8003".into())
}

fn default_analysis_url() -> Option<String> {
    Some("http://localhost:8004".into())
}

fn default_indexer_url() -> Option<String> {
    Some("http://localhost:8002".into())
}

fn default_vector_top_k() -> usize {
    10
}

fn default_rerank_weight() -> f32 {
    0.7
}

fn default_repo_id() -> String {
    "default".into()
}

fn default_branch() -> String {
    "main".into()
}

fn default_agent_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default = "default_graph_url")]
    pub graph_url: Option<String>,
    #[serde(default = "default_analysis_url")]
    pub analysis_url: Option<String>,
    /// Semantic search is served by the indexer unless set.
    #[serde(default)]
    pub vector_url: Option<String>,
    #[serde(default = "default_indexer_url")]
    pub indexer_url: Option<String>,
    /// Re-ranking agent for vector results. Similarity only when unset.
    #[serde(default)]
    pub rerank_url: Option<String>,
    #[serde(default = "default_vector_top_k")]
    pub vector_top_k: usize,
    #[serde(default = "default_rerank_weight")]
    pub rerank_weight: f32,
    /// Add vector search to `search` and `explain` routes.
    #[serde(default)]
    pub vector_augment: bool,
    #[serde(default = "default_repo_id")]
    pub repo_id: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            graph_url: default_graph_url(),
            analysis_url: default_analysis_url(),
            vector_url: None,
            indexer_url: default_indexer_url(),
            rerank_url: None,
            vector_top_k: default_vector_top_k(),
            rerank_weight: default_rerank_weight(),
            vector_augment: false,
            repo_id: default_repo_id(),
            branch: default_branch(),
            agent_timeout_secs: default_agent_timeout_secs(),
        }
    }
}

impl SourcesConfig {
    #[must_use]
    pub fn effective_vector_url(&self) -> Option<&str> {
        self.vector_url.as_deref().or(self.indexer_url.as_deref())
    }
}
