use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentError;
use crate::error::RetrievalError;
use crate::source::{BoxFuture, RetrievalRequest, RetrievalSource, with_budget};
use crate::types::{Provenance, RetrievalResult, SourceItem, SourceKind};

/// Deep analysis of a single function or method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionAnalysis {
    pub name: String,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub calls: Vec<String>,
    #[serde(default)]
    pub callers: Vec<String>,
    /// Either plain names or `{name, type}` objects.
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
    #[serde(default)]
    pub complexity: Option<u32>,
    #[serde(default)]
    pub line_count: Option<u32>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub start_line: Option<u32>,
}

impl FunctionAnalysis {
    fn parameter_names(&self) -> Vec<String> {
        self.parameters
            .iter()
            .map(|p| match p {
                serde_json::Value::String(s) => s.clone(),
                other => other
                    .get("name")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| other.to_string(), str::to_owned),
            })
            .collect()
    }

    fn summary(&self) -> String {
        let mut out = format!("Function `{}`", self.name);
        let params = self.parameter_names();
        if !params.is_empty() {
            out.push_str(&format!("({})", params.join(", ")));
        }
        if let Some(doc) = self.docstring.as_deref().filter(|d| !d.trim().is_empty()) {
            out.push_str(&format!("\n{}", doc.trim()));
        }
        if let Some(c) = self.complexity {
            out.push_str(&format!("\ncyclomatic complexity: {c}"));
        }
        if let Some(n) = self.line_count {
            out.push_str(&format!("\nlines: {n}"));
        }
        out
    }

    fn provenance(&self) -> Provenance {
        match &self.file_path {
            Some(path) => Provenance::file(
                SourceKind::Analysis,
                path,
                self.start_line,
                self.start_line
                    .zip(self.line_count)
                    .map(|(s, n)| s.saturating_add(n.saturating_sub(1))),
            ),
            None => Provenance::entity(SourceKind::Analysis, &self.name, Some("Function".into())),
        }
    }
}

pub trait AnalysisBackend: Send + Sync {
    /// Analyze one named function. `Ok(None)` when the name is unknown.
    fn analyze(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<FunctionAnalysis>, AgentError>> + Send;
}

const SUMMARY_SCORE: f32 = 0.95;
const CALL_GRAPH_SCORE: f32 = 0.8;

pub struct AnalysisRetriever<B> {
    backend: B,
}

impl<B: AnalysisBackend> AnalysisRetriever<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    async fn collect(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        let mut items = Vec::new();
        let mut tools_used = Vec::new();
        let mut failures = Vec::new();

        for name in request.lookup_names() {
            tools_used.push(format!("analyze({name})"));
            let analysis = match self.backend.analyze(name).await {
                Ok(Some(a)) => a,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(source = "analysis", entity = name, "analysis failed: {e}");
                    failures.push(e.to_string());
                    continue;
                }
            };

            items.push(SourceItem::new(
                analysis.provenance(),
                analysis.summary(),
                SUMMARY_SCORE,
            ));

            let mut graph = Vec::new();
            if !analysis.calls.is_empty() {
                graph.push(format!("`{}` calls: {}", analysis.name, analysis.calls.join(", ")));
            }
            if !analysis.callers.is_empty() {
                graph.push(format!(
                    "`{}` is called by: {}",
                    analysis.name,
                    analysis.callers.join(", ")
                ));
            }
            if !graph.is_empty() {
                items.push(SourceItem::new(
                    analysis.provenance(),
                    graph.join("\n"),
                    CALL_GRAPH_SCORE,
                ));
            }
        }

        if items.is_empty() && !failures.is_empty() {
            return Err(RetrievalError::failed(
                SourceKind::Analysis,
                failures.join("; "),
            ));
        }
        Ok(RetrievalResult::ranked(SourceKind::Analysis, items, tools_used))
    }
}

impl<B: AnalysisBackend> RetrievalSource for AnalysisRetriever<B> {
    fn kind(&self) -> SourceKind {
        SourceKind::Analysis
    }

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrievalRequest,
        budget: Duration,
    ) -> BoxFuture<'a, Result<RetrievalResult, RetrievalError>> {
        Box::pin(with_budget(SourceKind::Analysis, budget, self.collect(request)))
    }
}
