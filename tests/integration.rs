use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use coderag_core::config::Config;
use coderag_core::coordinator::OutcomeStatus;
use coderag_core::{
    ExecutionCoordinator, Intent, IntentClassifier, Orchestrator, QueryRequest, SourceRegistry,
    Synthesizer,
};
use coderag_llm::mock::MockProvider;
use coderag_memory::sqlite::SqliteStore;
use coderag_memory::{ConversationStore, InMemoryTurnCache};
use coderag_retrieval::{
    AgentClient, AnalysisRetriever, BoxFuture, GraphRetriever, Provenance, RetrievalError,
    RetrievalRequest, RetrievalResult, RetrievalSource, SourceItem, SourceKind,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// -- Fake retrieval source --

struct SlowSource {
    kind: SourceKind,
    delay: Duration,
    items: usize,
}

impl SlowSource {
    fn new(kind: SourceKind, delay_ms: u64, items: usize) -> Arc<dyn RetrievalSource> {
        Arc::new(Self {
            kind,
            delay: Duration::from_millis(delay_ms),
            items,
        })
    }
}

impl RetrievalSource for SlowSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn retrieve<'a>(
        &'a self,
        _request: &'a RetrievalRequest,
        _budget: Duration,
    ) -> BoxFuture<'a, Result<RetrievalResult, RetrievalError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            let items = (0..self.items)
                .map(|i| {
                    let score = 0.9 - 0.1 * f32::from(u8::try_from(i).unwrap_or(u8::MAX));
                    SourceItem::new(
                        Provenance::note(self.kind, format!("{}-{i}", self.kind)),
                        format!("{} evidence {i}", self.kind),
                        score,
                    )
                })
                .collect();
            Ok(RetrievalResult::ranked(self.kind, items, vec![]))
        })
    }
}

fn classification(intent: &str, entity: &str) -> String {
    format!(r#"{{"intent": "{intent}", "entities": ["{entity}"], "confidence": 0.8}}"#)
}

async fn store_at(path: &str) -> Arc<ConversationStore> {
    let durable = SqliteStore::new(path).await.unwrap();
    let cache = Arc::new(InMemoryTurnCache::new(Duration::from_secs(3600), 50));
    Arc::new(ConversationStore::new(durable, cache))
}

fn orchestrator(
    store: Arc<ConversationStore>,
    provider: MockProvider,
    registry: SourceRegistry,
    global: Duration,
    per_source: Duration,
) -> Orchestrator<MockProvider> {
    let provider = Arc::new(provider);
    Orchestrator::new(
        store,
        IntentClassifier::new(Arc::clone(&provider), Duration::from_secs(5)),
        ExecutionCoordinator::new(registry, global, per_source),
        Synthesizer::new(provider, 8, 1200, Duration::from_secs(5)),
    )
}

// -- Config --

#[test]
fn config_loading_nonexistent_uses_defaults() {
    let config = Config::load(Path::new("/does/not/exist.toml")).unwrap();
    assert_eq!(config.orchestrator.global_budget_ms, 30_000);
    assert_eq!(config.synthesis.top_k, 8);
}

#[test]
fn bundled_config_matches_defaults() {
    let config = Config::load(Path::new("config/default.toml")).unwrap();
    let defaults = Config::default();
    assert_eq!(
        config.orchestrator.per_source_timeout(),
        defaults.orchestrator.per_source_timeout()
    );
    assert_eq!(config.sources.graph_url, defaults.sources.graph_url);
}

// -- Orchestration --

#[tokio::test]
async fn parallel_fan_out_is_bounded_by_slowest_source() {
    let registry = SourceRegistry::new()
        .with(SlowSource::new(SourceKind::Graph, 300, 1))
        .with(SlowSource::new(SourceKind::Analysis, 300, 1));
    let provider = MockProvider::with_responses(vec![
        classification("explain", "Scheduler"),
        "Scheduler runs jobs [1][2].".into(),
    ]);
    let orch = orchestrator(
        store_at(":memory:").await,
        provider,
        registry,
        Duration::from_secs(5),
        Duration::from_secs(4),
    );

    let response = orch
        .handle_query(QueryRequest::new("Explain Scheduler"))
        .await
        .unwrap();

    assert_eq!(response.intent.intent, Intent::Explain);
    assert!(response.diagnostics.timing.execute_ms < 550);
    assert_eq!(response.answer.citations.len(), 2);
}

#[tokio::test]
async fn slow_analysis_times_out_and_degrades() {
    let registry = SourceRegistry::new()
        .with(SlowSource::new(SourceKind::Graph, 10, 2))
        .with(SlowSource::new(SourceKind::Analysis, 10_000, 2));
    let provider = MockProvider::with_responses(vec![
        classification("explain", "X"),
        "X is a struct [1].".into(),
    ]);
    let orch = orchestrator(
        store_at(":memory:").await,
        provider,
        registry,
        Duration::from_secs(1),
        Duration::from_millis(300),
    );

    let response = orch.handle_query(QueryRequest::new("Explain X")).await.unwrap();

    assert_eq!(response.answer.degraded_sources, vec![SourceKind::Analysis]);
    assert!(!response.answer.insufficient_evidence);
    assert!(response.diagnostics.timing.execute_ms < 1000);
    let analysis = response
        .diagnostics
        .outcomes
        .iter()
        .find(|o| o.source == SourceKind::Analysis)
        .unwrap();
    assert_eq!(analysis.status, OutcomeStatus::Timeout);
    assert!(
        response
            .answer
            .citations
            .iter()
            .all(|c| c.provenance.source == SourceKind::Graph)
    );
}

#[tokio::test]
async fn citations_point_at_ranked_evidence() {
    let registry = SourceRegistry::new()
        .with(SlowSource::new(SourceKind::Graph, 0, 6))
        .with(SlowSource::new(SourceKind::Analysis, 0, 6));
    let provider = MockProvider::with_responses(vec![
        classification("analyze", "Pool"),
        "Pool is complex.".into(),
    ]);
    let orch = orchestrator(
        store_at(":memory:").await,
        provider,
        registry,
        Duration::from_secs(5),
        Duration::from_secs(4),
    );

    let response = orch.handle_query(QueryRequest::new("Analyze Pool")).await.unwrap();
    let citations = &response.answer.citations;

    assert_eq!(citations.len(), 8);
    for (i, c) in citations.iter().enumerate() {
        assert_eq!(c.index, i + 1);
    }
    for pair in citations.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    // analyze routes analysis first, so it wins score ties
    assert_eq!(citations[0].provenance.source, SourceKind::Analysis);
    assert_eq!(citations[1].provenance.source, SourceKind::Graph);
}

#[tokio::test]
async fn queries_without_session_get_distinct_sessions() {
    let registry = SourceRegistry::new().with(SlowSource::new(SourceKind::Graph, 0, 1));
    let orch = orchestrator(
        store_at(":memory:").await,
        MockProvider::default(),
        registry,
        Duration::from_secs(5),
        Duration::from_secs(4),
    );

    let a = orch.handle_query(QueryRequest::new("What is A?")).await.unwrap();
    let b = orch.handle_query(QueryRequest::new("What is B?")).await.unwrap();

    assert_ne!(a.session_id, b.session_id);
    assert!(a.diagnostics.session_created && b.diagnostics.session_created);
    // the mock's default reply is not a classification
    assert!(a.diagnostics.classification_degraded);
    assert_eq!(a.intent.intent, Intent::Search);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_in_one_session_keep_turns_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("coderag.db");
    let store = store_at(db.to_str().unwrap()).await;
    let session = store
        .create_session("carol", serde_json::Map::new())
        .await
        .unwrap();

    let registry = SourceRegistry::new().with(SlowSource::new(SourceKind::Graph, 5, 1));
    let orch = Arc::new(orchestrator(
        Arc::clone(&store),
        MockProvider::default(),
        registry,
        Duration::from_secs(5),
        Duration::from_secs(4),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let orch = Arc::clone(&orch);
        handles.push(tokio::spawn(async move {
            orch.handle_query(QueryRequest::new(format!("What is item {i}?")).in_session(session.id))
                .await
        }));
    }
    for h in handles {
        let response = h.await.unwrap().unwrap();
        assert!(!response.diagnostics.persistence_failed);
    }

    let turns = store.recent_context(session.id, 100).await.unwrap();
    let numbers: HashSet<i64> = turns.iter().map(|t| t.turn_number).collect();
    assert_eq!(turns.len(), 16);
    assert_eq!(numbers, (1..=16).collect());
}

// -- End to end over the agent protocol --

fn envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data}))
}

#[tokio::test]
async fn what_is_query_consults_only_the_graph_agent() {
    let graph = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(query_param("tool_name", "find_entity"))
        .respond_with(envelope(json!({
            "name": "AuthService",
            "type": "Class",
            "properties": {"file_path": "src/auth.rs"}
        })))
        .expect(1)
        .mount(&graph)
        .await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(query_param("tool_name", "find_related"))
        .respond_with(envelope(json!({
            "related": [{"name": "TokenStore", "type": "Class", "relationship": "USES"}]
        })))
        .expect(1)
        .mount(&graph)
        .await;

    let analysis = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(envelope(json!(null)))
        .expect(0)
        .mount(&analysis)
        .await;

    let agent = |server: &MockServer| AgentClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let registry = SourceRegistry::new()
        .with(Arc::new(GraphRetriever::new(agent(&graph))))
        .with(Arc::new(AnalysisRetriever::new(agent(&analysis))));
    let provider = MockProvider::with_responses(vec![
        classification("search", "AuthService"),
        "AuthService authenticates users and uses TokenStore [1][2].".into(),
    ]);
    let orch = orchestrator(
        store_at(":memory:").await,
        provider,
        registry,
        Duration::from_secs(5),
        Duration::from_secs(4),
    );

    let response = orch
        .handle_query(QueryRequest::new("What is AuthService?"))
        .await
        .unwrap();

    assert_eq!(response.diagnostics.sources_used, vec![SourceKind::Graph]);
    assert_eq!(response.answer.citations.len(), 2);
    assert!(
        response.answer.citations[0]
            .provenance
            .to_string()
            .contains("AuthService")
    );
    assert!(response.answer.degraded_sources.is_empty());
}

#[tokio::test]
async fn unreachable_agent_degrades_to_insufficient_evidence() {
    let graph = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&graph)
        .await;

    let registry = SourceRegistry::new().with(Arc::new(GraphRetriever::new(
        AgentClient::new(&graph.uri(), Duration::from_secs(5)).unwrap(),
    )));
    let provider = MockProvider::with_responses(vec![classification("search", "Nothing")]);
    let orch = orchestrator(
        store_at(":memory:").await,
        provider.clone(),
        registry,
        Duration::from_secs(5),
        Duration::from_secs(4),
    );

    let response = orch
        .handle_query(QueryRequest::new("What is Nothing?"))
        .await
        .unwrap();

    assert!(response.answer.insufficient_evidence);
    assert_eq!(response.answer.degraded_sources, vec![SourceKind::Graph]);
    assert_eq!(provider.call_count(), 1);
}
