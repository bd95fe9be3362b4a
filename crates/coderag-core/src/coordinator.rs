//! Concurrent fan-out over retrieval sources under a global deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use coderag_retrieval::{RetrievalError, RetrievalRequest, RetrievalResult, RetrievalSource, SourceKind};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::router::Route;

/// Retrieval sources available to the coordinator, one per kind.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<SourceKind, Arc<dyn RetrievalSource>>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under its own kind, replacing any previous one.
    #[must_use]
    pub fn with(mut self, source: Arc<dyn RetrievalSource>) -> Self {
        self.sources.insert(source.kind(), source);
        self
    }

    #[must_use]
    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn RetrievalSource>> {
        self.sources.get(&kind)
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds: Vec<_> = self.sources.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub kind: SourceKind,
    pub result: Result<RetrievalResult, RetrievalError>,
    pub elapsed: Duration,
}

impl SourceOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Short, serializable description for events and the audit log.
    #[must_use]
    pub fn summary(&self) -> OutcomeSummary {
        match &self.result {
            Ok(r) => OutcomeSummary {
                source: self.kind,
                status: OutcomeStatus::Ok,
                items: r.len(),
                error: None,
                elapsed_ms: millis(self.elapsed),
            },
            Err(e) => OutcomeSummary {
                source: self.kind,
                status: if e.is_timeout() {
                    OutcomeStatus::Timeout
                } else {
                    OutcomeStatus::Error
                },
                items: 0,
                error: Some(e.to_string()),
                elapsed_ms: millis(self.elapsed),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Timeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    pub source: SourceKind,
    pub status: OutcomeStatus,
    pub items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Every routed source's terminal outcome, in route order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub outcomes: Vec<SourceOutcome>,
    pub elapsed: Duration,
}

impl ExecutionReport {
    #[must_use]
    pub fn outcome(&self, kind: SourceKind) -> Option<&SourceOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }

    pub fn successes(&self) -> impl Iterator<Item = &RetrievalResult> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    #[must_use]
    pub fn failed_sources(&self) -> Vec<SourceKind> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.kind)
            .collect()
    }

    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.outcomes.iter().all(|o| !o.is_success())
    }
}

pub struct ExecutionCoordinator {
    sources: SourceRegistry,
    global_budget: Duration,
    per_source_timeout: Duration,
}

impl ExecutionCoordinator {
    /// `per_source_timeout` is capped at `global_budget`.
    #[must_use]
    pub fn new(sources: SourceRegistry, global_budget: Duration, per_source_timeout: Duration) -> Self {
        Self {
            sources,
            global_budget,
            per_source_timeout: per_source_timeout.min(global_budget),
        }
    }

    #[must_use]
    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    #[must_use]
    pub fn global_budget(&self) -> Duration {
        self.global_budget
    }

    fn spawn_source(
        &self,
        set: &mut JoinSet<(usize, SourceOutcome)>,
        slot: usize,
        kind: SourceKind,
        request: &Arc<RetrievalRequest>,
        deadline: Instant,
    ) -> Result<(), SourceOutcome> {
        let Some(source) = self.sources.get(kind).cloned() else {
            tracing::warn!(source = %kind, "no source configured for route");
            return Err(SourceOutcome {
                kind,
                result: Err(RetrievalError::failed(kind, "source not configured")),
                elapsed: Duration::ZERO,
            });
        };
        let request = Arc::clone(request);
        let budget = self
            .per_source_timeout
            .min(deadline.saturating_duration_since(Instant::now()));

        set.spawn(async move {
            let started = Instant::now();
            let result = tokio::time::timeout(budget, source.retrieve(&request, budget))
                .await
                .unwrap_or(Err(RetrievalError::Timeout { kind, budget }));
            let elapsed = started.elapsed();
            (slot, SourceOutcome { kind, result, elapsed })
        });
        Ok(())
    }

    /// Dispatch every routed source and wait for all of them, never past the global budget.
    ///
    /// Parallel routes run all sources at once; sequential routes run them one at a
    /// time against the same deadline. Sources still running at the deadline are
    /// cancelled and reported as `RetrievalError::Timeout`. `on_outcome` sees each
    /// outcome as soon as it is known.
    pub async fn execute<F>(
        &self,
        route: &Route,
        request: &RetrievalRequest,
        on_outcome: F,
    ) -> ExecutionReport
    where
        F: FnMut(&SourceOutcome) + Send,
    {
        let deadline = Instant::now() + self.global_budget;
        self.execute_until(route, request, deadline, on_outcome).await
    }

    /// Like [`ExecutionCoordinator::execute`], but stops at `deadline` when it
    /// comes before the global budget runs out.
    pub async fn execute_until<F>(
        &self,
        route: &Route,
        request: &RetrievalRequest,
        deadline: Instant,
        mut on_outcome: F,
    ) -> ExecutionReport
    where
        F: FnMut(&SourceOutcome) + Send,
    {
        let started = Instant::now();
        let deadline = deadline.min(started + self.global_budget);
        let budget = deadline.saturating_duration_since(started);
        let request = Arc::new(request.clone());
        let max_in_flight = if route.parallel { usize::MAX } else { 1 };

        let mut slots: Vec<Option<SourceOutcome>> = route.sources.iter().map(|_| None).collect();
        let mut queue = route.sources.iter().copied().enumerate();
        let mut set = JoinSet::new();

        loop {
            while set.len() < max_in_flight {
                let Some((slot, kind)) = queue.next() else {
                    break;
                };
                if let Err(outcome) = self.spawn_source(&mut set, slot, kind, &request, deadline) {
                    on_outcome(&outcome);
                    slots[slot] = Some(outcome);
                }
            }
            if set.is_empty() {
                break;
            }

            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((slot, outcome)))) => {
                    tracing::debug!(
                        source = %outcome.kind,
                        ok = outcome.is_success(),
                        elapsed_ms = millis(outcome.elapsed),
                        "source finished"
                    );
                    on_outcome(&outcome);
                    slots[slot] = Some(outcome);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!("retrieval task did not complete: {e}");
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        outstanding = set.len(),
                        budget_ms = millis(budget),
                        "global budget exhausted, cancelling remaining sources"
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        let expired = Instant::now() >= deadline;
        let outcomes = slots
            .into_iter()
            .zip(&route.sources)
            .map(|(slot, &kind)| {
                slot.unwrap_or_else(|| {
                    let result = if expired {
                        Err(RetrievalError::Timeout { kind, budget })
                    } else {
                        Err(RetrievalError::failed(kind, "retrieval task aborted"))
                    };
                    let outcome = SourceOutcome {
                        kind,
                        result,
                        elapsed: started.elapsed(),
                    };
                    on_outcome(&outcome);
                    outcome
                })
            })
            .collect();

        ExecutionReport {
            outcomes,
            elapsed: started.elapsed(),
        }
    }
}
