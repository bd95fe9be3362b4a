use std::sync::Arc;
use std::time::Duration;

use coderag_llm::{LlmProvider, Message};
use coderag_memory::{Turn, TurnRole};
use coderag_retrieval::{Provenance, SourceItem, SourceKind};
use serde::Serialize;
use tokio::time::Instant;

use crate::coordinator::ExecutionReport;
use crate::intent::CONTEXT_TURN_CHARS;
use crate::router::Route;
use crate::text::truncate_chars;

pub const INSUFFICIENT_EVIDENCE: &str =
    "I could not find enough evidence in the indexed repository to answer this question.";

const SYNTHESIS_PROMPT: &str = "You answer questions about a source code repository.\n\
Use only the numbered evidence provided. Cite evidence inline as [n].\n\
If the evidence does not answer the question, say so plainly.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// 1-based position in the evidence sent to the model.
    pub index: usize,
    pub provenance: Provenance,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub insufficient_evidence: bool,
    /// Routed sources that timed out or failed.
    pub degraded_sources: Vec<SourceKind>,
}

impl SynthesizedAnswer {
    fn insufficient(degraded_sources: Vec<SourceKind>) -> Self {
        Self {
            text: INSUFFICIENT_EVIDENCE.to_owned(),
            citations: Vec::new(),
            insufficient_evidence: true,
            degraded_sources,
        }
    }
}

/// Pool successful items and keep the best `top_k`.
///
/// Order: score descending, then route precedence, then position within the source.
#[must_use]
pub fn rank_evidence(report: &ExecutionReport, route: &Route, top_k: usize) -> Vec<SourceItem> {
    let mut pool: Vec<(usize, usize, &SourceItem)> = report
        .successes()
        .flat_map(|result| {
            let precedence = route.precedence(result.source());
            result
                .items()
                .iter()
                .enumerate()
                .map(move |(i, item)| (precedence, i, item))
        })
        .collect();

    pool.sort_by(|a, b| {
        b.2.score
            .total_cmp(&a.2.score)
            .then(a.0.cmp(&b.0))
            .then(a.1.cmp(&b.1))
    });
    pool.into_iter()
        .take(top_k)
        .map(|(_, _, item)| item.clone())
        .collect()
}

fn render_context(context: &[Turn]) -> String {
    context
        .iter()
        .rev()
        .map(|t| {
            let who = if t.role == TurnRole::User { "User" } else { "Assistant" };
            format!("{who}: {}", truncate_chars(&t.content, CONTEXT_TURN_CHARS))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Synthesizer<P> {
    provider: Arc<P>,
    top_k: usize,
    max_item_chars: usize,
    timeout: Duration,
}

impl<P: LlmProvider> Synthesizer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, top_k: usize, max_item_chars: usize, timeout: Duration) -> Self {
        Self {
            provider,
            top_k: top_k.max(1),
            max_item_chars,
            timeout,
        }
    }

    /// Build the generation prompt for `evidence`. Context turns are given most recent first.
    #[must_use]
    pub fn build_prompt(&self, query: &str, evidence: &[SourceItem], context: &[Turn]) -> Vec<Message> {
        let mut body = String::new();
        if !context.is_empty() {
            body.push_str("Conversation so far:\n");
            body.push_str(&render_context(context));
            body.push_str("\n\n");
        }
        body.push_str("Evidence:\n");
        for (i, item) in evidence.iter().enumerate() {
            body.push_str(&format!(
                "[{}] {}\n{}\n\n",
                i + 1,
                item.provenance,
                truncate_chars(&item.content, self.max_item_chars)
            ));
        }
        body.push_str("Question: ");
        body.push_str(query);

        vec![Message::system(SYNTHESIS_PROMPT), Message::user(body)]
    }

    /// Produce a cited answer from the coordinator's outcomes.
    ///
    /// Never calls the model with an empty evidence pool. A failed or timed out
    /// generation call yields the insufficient-evidence answer.
    pub async fn synthesize(
        &self,
        query: &str,
        report: &ExecutionReport,
        route: &Route,
        context: &[Turn],
    ) -> SynthesizedAnswer {
        self.synthesize_until(query, report, route, context, Instant::now() + self.timeout)
            .await
    }

    /// Like [`synthesize`](Self::synthesize), bounded by `deadline` as well as
    /// the synthesizer's own timeout.
    pub async fn synthesize_until(
        &self,
        query: &str,
        report: &ExecutionReport,
        route: &Route,
        context: &[Turn],
        deadline: Instant,
    ) -> SynthesizedAnswer {
        let degraded_sources = report.failed_sources();
        let evidence = rank_evidence(report, route, self.top_k);
        if evidence.is_empty() {
            tracing::info!(?degraded_sources, "no evidence, skipping generation");
            return SynthesizedAnswer::insufficient(degraded_sources);
        }

        let messages = self.build_prompt(query, &evidence, context);
        let deadline = deadline.min(Instant::now() + self.timeout);
        let text = match tokio::time::timeout_at(deadline, self.provider.chat(&messages)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => {
                tracing::warn!(provider = self.provider.name(), "empty synthesis reply");
                return SynthesizedAnswer::insufficient(degraded_sources);
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = self.provider.name(), "synthesis failed: {e}");
                return SynthesizedAnswer::insufficient(degraded_sources);
            }
            Err(_) => {
                tracing::warn!(provider = self.provider.name(), "synthesis timed out");
                return SynthesizedAnswer::insufficient(degraded_sources);
            }
        };

        let citations = evidence
            .into_iter()
            .enumerate()
            .map(|(i, item)| Citation {
                index: i + 1,
                provenance: item.provenance,
                score: item.score,
            })
            .collect();

        SynthesizedAnswer {
            text,
            citations,
            insufficient_evidence: false,
            degraded_sources,
        }
    }
}
