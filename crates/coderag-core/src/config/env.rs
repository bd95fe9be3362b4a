use super::{Config, ProviderKind};

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {raw}");
            None
        }
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = parsed("CODERAG_GLOBAL_BUDGET_MS") {
            self.orchestrator.global_budget_ms = v;
        }
        if let Some(v) = parsed("CODERAG_PER_SOURCE_FRACTION") {
            self.orchestrator.per_source_fraction = v;
        }
        if let Some(v) = parsed("CODERAG_PER_SOURCE_FLOOR_MS") {
            self.orchestrator.per_source_floor_ms = v;
        }
        if let Some(v) = parsed("CODERAG_CONTEXT_TURNS") {
            self.orchestrator.context_turns = v;
        }
        if let Some(v) = parsed("CODERAG_LLM_TIMEOUT_MS") {
            self.orchestrator.llm_timeout_ms = v;
        }
        if let Some(v) = parsed("CODERAG_SYNTHESIS_TOP_K") {
            self.synthesis.top_k = v;
        }
        if let Ok(v) = std::env::var("CODERAG_SQLITE_PATH") {
            self.memory.sqlite_path = v;
        }
        if let Some(v) = parsed("CODERAG_CACHE_TTL_SECS") {
            self.memory.cache_ttl_secs = v;
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value::<ProviderKind>(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CODERAG_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("CODERAG_GRAPH_URL") {
            self.sources.graph_url = Some(v);
        }
        if let Ok(v) = std::env::var("CODERAG_ANALYSIS_URL") {
            self.sources.analysis_url = Some(v);
        }
        if let Ok(v) = std::env::var("CODERAG_VECTOR_URL") {
            self.sources.vector_url = Some(v);
        }
        if let Ok(v) = std::env::var("CODERAG_RERANK_URL") {
            self.sources.rerank_url = Some(v);
        }
        if let Ok(v) = std::env::var("CODERAG_INDEXER_URL") {
            self.sources.indexer_url = Some(v);
        }
        if let Some(v) = parsed("CODERAG_VECTOR_AUGMENT") {
            self.sources.vector_augment = v;
        }
        if let Ok(v) = std::env::var("CODERAG_REPO_ID") {
            self.sources.repo_id = v;
        }
    }
}
