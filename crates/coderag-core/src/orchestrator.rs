//! Per-request state machine:
//! `ContextLoaded -> Classified -> Routed -> Executed -> Synthesized -> Persisted`.

use std::sync::Arc;
use std::time::Instant;

use coderag_llm::LlmProvider;
use coderag_memory::{ConversationStore, NewAgentResponse, SessionId, TurnRole};
use coderag_retrieval::{IndexOperation, RetrievalRequest, SourceKind};
use serde::Serialize;
use serde_json::json;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::coordinator::{ExecutionCoordinator, ExecutionReport, OutcomeSummary, millis};
use crate::error::OrchestratorError;
use crate::events::{QueryEvent, answer_chunks};
use crate::intent::{Intent, IntentClassifier, IntentDescriptor, enrich_query};
use crate::router::{Route, RoutingPolicy, route};
use crate::synthesizer::{SynthesizedAnswer, Synthesizer};
use crate::text::truncate_chars;

const SESSION_NAME_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ContextLoaded,
    Classified,
    Routed,
    Executed,
    Synthesized,
    Persisted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    pub session_id: Option<SessionId>,
    pub user_id: String,
}

impl QueryRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            user_id: "anonymous".into(),
        }
    }

    #[must_use]
    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimingBreakdown {
    pub context_ms: u64,
    pub classify_ms: u64,
    pub execute_ms: u64,
    pub synthesize_ms: u64,
    pub persist_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub sources_used: Vec<SourceKind>,
    pub outcomes: Vec<OutcomeSummary>,
    pub timing: TimingBreakdown,
    pub session_created: bool,
    pub classification_degraded: bool,
    pub persistence_failed: bool,
    /// Mermaid relationship diagram from the graph source, if it found any edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub session_id: SessionId,
    pub answer: SynthesizedAnswer,
    pub intent: IntentDescriptor,
    pub diagnostics: Diagnostics,
}

fn index_operation(intent: Intent) -> Option<IndexOperation> {
    match intent {
        Intent::Index => Some(IndexOperation::Index),
        Intent::Embed => Some(IndexOperation::Embed),
        Intent::Stats => Some(IndexOperation::Stats),
        Intent::Search | Intent::Explain | Intent::Analyze => None,
    }
}

pub struct Orchestrator<P> {
    store: Arc<ConversationStore>,
    classifier: IntentClassifier<P>,
    coordinator: ExecutionCoordinator,
    synthesizer: Synthesizer<P>,
    policy: RoutingPolicy,
    context_turns: usize,
}

impl<P: LlmProvider> Orchestrator<P> {
    #[must_use]
    pub fn new(
        store: Arc<ConversationStore>,
        classifier: IntentClassifier<P>,
        coordinator: ExecutionCoordinator,
        synthesizer: Synthesizer<P>,
    ) -> Self {
        Self {
            store,
            classifier,
            coordinator,
            synthesizer,
            policy: RoutingPolicy::default(),
            context_turns: 5,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RoutingPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Answer one query. Classification, retrieval and synthesis together are
    /// bounded by the coordinator's global budget.
    ///
    /// # Errors
    ///
    /// Aborts only for an empty query, an unusable session, an unreachable
    /// store before execution, or an intent no configured source can serve.
    pub async fn handle_query(
        &self,
        request: QueryRequest,
    ) -> Result<QueryResponse, OrchestratorError> {
        self.run(request, &mut |_| {}).await
    }

    async fn open_session(
        &self,
        request: &QueryRequest,
        emit: &mut (dyn FnMut(QueryEvent) + Send),
    ) -> Result<(SessionId, bool), OrchestratorError> {
        if let Some(id) = request.session_id {
            let session = self
                .store
                .session(id)
                .await
                .map_err(OrchestratorError::StorageUnavailable)?
                .ok_or(OrchestratorError::SessionNotFound(id))?;
            if session.is_closed() {
                return Err(OrchestratorError::SessionClosed(id));
            }
            return Ok((id, false));
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "session_name".into(),
            json!(format!("Query: {}", truncate_chars(request.query.trim(), SESSION_NAME_CHARS))),
        );
        let session = self
            .store
            .create_session(&request.user_id, metadata)
            .await
            .map_err(OrchestratorError::StorageUnavailable)?;
        emit(QueryEvent::SessionCreated {
            session_id: session.id,
        });
        Ok((session.id, true))
    }

    fn resolve_route(&self, descriptor: &IntentDescriptor) -> Result<Route, OrchestratorError> {
        let route = route(descriptor, self.policy);
        let sources = self.coordinator.sources();
        if route.sources.iter().all(|k| sources.get(*k).is_none()) {
            return Err(OrchestratorError::NoRoute(descriptor.intent));
        }
        Ok(route)
    }

    async fn run(
        &self,
        request: QueryRequest,
        emit: &mut (dyn FnMut(QueryEvent) + Send),
    ) -> Result<QueryResponse, OrchestratorError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(OrchestratorError::EmptyQuery);
        }
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.coordinator.global_budget();
        let mut timing = TimingBreakdown::default();

        let (session_id, session_created) = self.open_session(&request, emit).await?;
        let context = self
            .store
            .recent_context(session_id, self.context_turns)
            .await
            .map_err(OrchestratorError::StorageUnavailable)?;
        timing.context_ms = millis(started.elapsed());
        tracing::debug!(%session_id, turns = context.len(), stage = ?Stage::ContextLoaded, "stage");
        emit(QueryEvent::Thinking {
            stage: Stage::ContextLoaded,
        });

        let t = Instant::now();
        let classification = self
            .classifier
            .classify_until(&enrich_query(query, &context), deadline)
            .await;
        timing.classify_ms = millis(t.elapsed());
        let descriptor = classification.descriptor;
        if classification.degraded {
            tracing::warn!(%session_id, "classification degraded, using {}", descriptor.intent);
        }
        tracing::debug!(
            %session_id,
            intent = %descriptor.intent,
            confidence = descriptor.confidence,
            stage = ?Stage::Classified,
            "stage"
        );

        let route = self.resolve_route(&descriptor)?;
        tracing::debug!(%session_id, sources = ?route.sources, parallel = route.parallel, stage = ?Stage::Routed, "stage");
        emit(QueryEvent::Routed {
            intent: descriptor.intent,
            confidence: descriptor.confidence,
            sources: route.sources.clone(),
            parallel: route.parallel,
        });

        let retrieval = RetrievalRequest {
            query: query.to_owned(),
            entities: descriptor.entities.clone(),
            repo_url: descriptor.repo_url.clone(),
            index_operation: index_operation(descriptor.intent),
        };
        let report = self
            .coordinator
            .execute_until(&route, &retrieval, deadline, |outcome| {
                emit(QueryEvent::PartialResult(outcome.summary()));
            })
            .await;
        timing.execute_ms = millis(report.elapsed);
        tracing::debug!(
            %session_id,
            failed = ?report.failed_sources(),
            elapsed_ms = timing.execute_ms,
            stage = ?Stage::Executed,
            "stage"
        );

        let t = Instant::now();
        let answer = self
            .synthesizer
            .synthesize_until(query, &report, &route, &context, deadline)
            .await;
        timing.synthesize_ms = millis(t.elapsed());
        tracing::debug!(
            %session_id,
            citations = answer.citations.len(),
            insufficient = answer.insufficient_evidence,
            stage = ?Stage::Synthesized,
            "stage"
        );

        let t = Instant::now();
        let persistence_failed = match self
            .persist(session_id, query, &descriptor, &report, &answer)
            .await
        {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!(%session_id, "failed to persist exchange: {e}");
                true
            }
        };
        timing.persist_ms = millis(t.elapsed());
        timing.total_ms = millis(started.elapsed());
        tracing::debug!(%session_id, total_ms = timing.total_ms, stage = ?Stage::Persisted, "stage");

        Ok(QueryResponse {
            session_id,
            diagnostics: Diagnostics {
                sources_used: route.sources.clone(),
                outcomes: report.outcomes.iter().map(|o| o.summary()).collect(),
                timing,
                session_created,
                classification_degraded: classification.degraded,
                persistence_failed,
                diagram: report.successes().find_map(|r| r.diagram()).map(str::to_owned),
            },
            answer,
            intent: descriptor,
        })
    }

    async fn persist(
        &self,
        session_id: SessionId,
        query: &str,
        descriptor: &IntentDescriptor,
        report: &ExecutionReport,
        answer: &SynthesizedAnswer,
    ) -> Result<(), coderag_memory::MemoryError> {
        self.store
            .append_turn(session_id, TurnRole::User, query, json!({}))
            .await?;

        let metadata = json!({
            "intent": descriptor.intent,
            "confidence": descriptor.confidence,
            "entities": descriptor.entities,
            "sources_used": report.outcomes.iter().map(|o| o.kind).collect::<Vec<_>>(),
            "source_count": answer.citations.len(),
            "insufficient_evidence": answer.insufficient_evidence,
            "degraded_sources": answer.degraded_sources,
        });
        let turn = self
            .store
            .append_turn(session_id, TurnRole::Assistant, &answer.text, metadata)
            .await?;

        for outcome in &report.outcomes {
            let tools_used = outcome
                .result
                .as_ref()
                .map(|r| r.tools_used().to_vec())
                .unwrap_or_default();
            let record = NewAgentResponse {
                source_name: outcome.kind.to_string(),
                tools_used,
                result: serde_json::to_value(outcome.summary())?,
                duration_ms: millis(outcome.elapsed),
            };
            self.store.record_agent_response(turn.id, &record).await?;
        }
        Ok(())
    }
}

impl<P: LlmProvider + 'static> Orchestrator<P> {
    /// Streaming variant of [`Orchestrator::handle_query`]. The stream always ends with `complete`.
    pub fn handle_query_stream(
        self: &Arc<Self>,
        request: QueryRequest,
    ) -> impl Stream<Item = QueryEvent> + Send + use<P> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let mut emit = |event: QueryEvent| {
                // A dropped receiver only means nobody is listening anymore.
                let _ = tx.send(event);
            };
            let complete = match this.run(request, &mut emit).await {
                Ok(response) => {
                    for chunk in answer_chunks(&response.answer.text) {
                        emit(chunk);
                    }
                    QueryEvent::Complete {
                        response: Some(Box::new(response)),
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!("streamed query aborted: {e}");
                    QueryEvent::Complete {
                        response: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            emit(complete);
        });

        UnboundedReceiverStream::new(rx)
    }
}
