use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
#[cfg(not(feature = "mock"))]
use anyhow::bail;
use coderag_core::config::{Config, ProviderKind};
use coderag_core::{
    ExecutionCoordinator, IntentClassifier, Orchestrator, RoutingPolicy, SourceRegistry,
    Synthesizer,
};
use coderag_llm::any::AnyProvider;
use coderag_llm::openai::OpenAiProvider;
use coderag_memory::sqlite::SqliteStore;
use coderag_memory::{ConversationStore, InMemoryTurnCache};
use coderag_retrieval::{
    AgentClient, AnalysisRetriever, GraphRetriever, IndexerSource, VectorRetriever,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client shared in shape by the model endpoint and every agent.
fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .user_agent(concat!("coderag/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .context("failed to build HTTP client")
}

pub(crate) fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    match config.llm.provider {
        ProviderKind::OpenAi => {
            let api_key = config.llm.api_key.clone().unwrap_or_else(|| {
                tracing::warn!("CODERAG_LLM_API_KEY not set, sending requests without a key");
                String::new()
            });
            let mut provider = OpenAiProvider::new(
                api_key,
                config.llm.base_url.clone(),
                config.llm.model.clone(),
                config.llm.max_tokens,
            )
            .with_client(http_client(config.orchestrator.llm_timeout())?);
            if let Some(t) = config.llm.temperature {
                provider = provider.with_temperature(t);
            }
            Ok(AnyProvider::OpenAi(provider))
        }
        #[cfg(feature = "mock")]
        ProviderKind::Mock => Ok(AnyProvider::Mock(coderag_llm::mock::MockProvider::default())),
        #[cfg(not(feature = "mock"))]
        ProviderKind::Mock => bail!("LLM provider mock not available (feature not enabled)"),
    }
}

fn agent(url: &str, config: &Config) -> anyhow::Result<AgentClient> {
    let http = http_client(Duration::from_secs(config.sources.agent_timeout_secs))?;
    let client =
        AgentClient::with_client(url, http).with_context(|| format!("invalid agent url {url}"))?;
    Ok(client
        .with_repo_id(config.sources.repo_id.clone())
        .with_branch(config.sources.branch.clone()))
}

/// Register one retrieval source per configured agent.
pub(crate) fn build_sources(config: &Config) -> anyhow::Result<SourceRegistry> {
    let sources = &config.sources;
    let mut registry = SourceRegistry::new();

    if let Some(url) = &sources.graph_url {
        registry = registry.with(Arc::new(GraphRetriever::new(agent(url, config)?)));
    }
    if let Some(url) = &sources.analysis_url {
        registry = registry.with(Arc::new(AnalysisRetriever::new(agent(url, config)?)));
    }
    if let Some(url) = sources.effective_vector_url() {
        let retriever = VectorRetriever::new(agent(url, config)?, sources.vector_top_k);
        registry = match &sources.rerank_url {
            Some(rerank) => registry.with(Arc::new(
                retriever.with_reranker(agent(rerank, config)?, sources.rerank_weight),
            )),
            None => registry.with(Arc::new(retriever)),
        };
    }
    if let Some(url) = &sources.indexer_url {
        registry = registry.with(Arc::new(IndexerSource::new(agent(url, config)?)));
    }

    tracing::info!(sources = ?registry.kinds(), "retrieval sources configured");
    Ok(registry)
}

pub(crate) async fn open_store(config: &Config) -> anyhow::Result<ConversationStore> {
    let path = &config.memory.sqlite_path;
    if path != ":memory:"
        && let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let durable = SqliteStore::new(path)
        .await
        .with_context(|| format!("failed to open conversation store at {path}"))?;
    let cache = Arc::new(InMemoryTurnCache::new(
        config.memory.cache_ttl(),
        config.memory.cache_capacity,
    ));
    Ok(ConversationStore::new(durable, cache))
}

pub(crate) async fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator<AnyProvider>> {
    let provider = Arc::new(create_provider(config)?);
    let store = Arc::new(open_store(config).await?);
    let o = &config.orchestrator;

    let coordinator =
        ExecutionCoordinator::new(build_sources(config)?, o.global_budget(), o.per_source_timeout());
    let classifier = IntentClassifier::new(Arc::clone(&provider), o.llm_timeout());
    let synthesizer = Synthesizer::new(
        provider,
        config.synthesis.top_k,
        config.synthesis.max_item_chars,
        o.llm_timeout(),
    );

    Ok(Orchestrator::new(store, classifier, coordinator, synthesizer)
        .with_policy(RoutingPolicy {
            vector_augment: config.sources.vector_augment,
        })
        .with_context_turns(o.context_turns))
}
