use std::sync::Arc;
use std::time::Duration;

use coderag_llm::{LlmProvider, Message};
use coderag_memory::{Turn, TurnRole};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::text::truncate_chars;

/// Context turns are cut to this many characters before prompting.
pub const CONTEXT_TURN_CHARS: usize = 500;

const DEFAULT_CONFIDENCE: f32 = 0.5;

const CLASSIFIER_PROMPT: &str = "You classify questions asked about a source code repository.\n\
Intents:\n\
- search: find or describe a named entity (\"What is X?\", \"Where is X?\")\n\
- explain: explain how something works or how to implement it\n\
- analyze: analyze, compare or find patterns in code\n\
- index: index a repository (include its URL as repo_url)\n\
- embed: build embeddings for a repository (include its URL as repo_url)\n\
- stats: report index statistics\n\
List the code entities (functions, classes, modules, files) named in the query as entities.\n\
Set confidence between 0 and 1.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Search,
    Explain,
    Analyze,
    Index,
    Embed,
    Stats,
}

impl Intent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Explain => "explain",
            Self::Analyze => "analyze",
            Self::Index => "index",
            Self::Embed => "embed",
            Self::Stats => "stats",
        }
    }

    /// Parse a label. Also accepts `implement`, `analyse`, `compare`, `pattern` and `status`.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "search" => Some(Self::Search),
            "explain" | "implement" => Some(Self::Explain),
            "analyze" | "analyse" | "compare" | "pattern" => Some(Self::Analyze),
            "index" => Some(Self::Index),
            "embed" => Some(Self::Embed),
            "stats" | "status" => Some(Self::Stats),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDescriptor {
    pub intent: Intent,
    /// Ordered, de-duplicated entity names.
    pub entities: Vec<String>,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub repo_url: Option<String>,
}

impl IntentDescriptor {
    /// The fallback used whenever classification cannot be trusted.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            intent: Intent::Search,
            entities: Vec::new(),
            confidence: 0.0,
            repo_url: None,
        }
    }
}

/// Shape requested from the model. Validated into an `IntentDescriptor`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RawClassification {
    pub intent: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub descriptor: IntentDescriptor,
    /// Set when the model output could not be used as-is.
    pub degraded: bool,
}

fn dedup_entities(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for e in raw {
        let e = e.trim();
        if !e.is_empty() && !out.iter().any(|x| x == e) {
            out.push(e.to_owned());
        }
    }
    out
}

impl RawClassification {
    /// Validate into a descriptor. Unknown intents fall back to `search` and mark the result degraded.
    #[must_use]
    pub fn validate(self) -> Classification {
        let confidence = self
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);
        let entities = dedup_entities(self.entities);
        let repo_url = self.repo_url.filter(|u| !u.trim().is_empty());

        match Intent::from_label(&self.intent) {
            Some(intent) => Classification {
                descriptor: IntentDescriptor {
                    intent,
                    entities,
                    confidence,
                    repo_url,
                },
                degraded: false,
            },
            None => {
                tracing::warn!(label = %self.intent, "unknown intent label, defaulting to search");
                Classification {
                    descriptor: IntentDescriptor {
                        entities,
                        repo_url,
                        ..IntentDescriptor::fallback()
                    },
                    degraded: true,
                }
            }
        }
    }
}

/// Prefix `query` with recent turns (given most recent first), oldest first in the output.
#[must_use]
pub fn enrich_query(query: &str, context: &[Turn]) -> String {
    if context.is_empty() {
        return query.to_owned();
    }
    let mut out = String::from("Previous conversation:\n");
    for turn in context.iter().rev() {
        let who = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        };
        out.push_str(who);
        out.push_str(": ");
        out.push_str(&truncate_chars(&turn.content, CONTEXT_TURN_CHARS));
        out.push('\n');
    }
    out.push_str("\nCurrent query: ");
    out.push_str(query);
    out
}

pub struct IntentClassifier<P> {
    provider: Arc<P>,
    timeout: Duration,
}

impl<P: LlmProvider> IntentClassifier<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Classify an enriched query. Never fails: any provider error, timeout or
    /// unparsable output yields the `search` fallback with `degraded = true`.
    pub async fn classify(&self, enriched_query: &str) -> Classification {
        self.classify_until(enriched_query, Instant::now() + self.timeout)
            .await
    }

    /// Like [`classify`](Self::classify), but the model call is also cut off
    /// at `deadline` when that comes before the classifier's own timeout.
    pub async fn classify_until(&self, enriched_query: &str, deadline: Instant) -> Classification {
        let messages = [
            Message::system(CLASSIFIER_PROMPT),
            Message::user(enriched_query),
        ];
        let deadline = deadline.min(Instant::now() + self.timeout);
        let outcome = tokio::time::timeout_at(
            deadline,
            self.provider.chat_typed::<RawClassification>(&messages),
        )
        .await;

        match outcome {
            Ok(Ok(raw)) => raw.validate(),
            Ok(Err(e)) => {
                tracing::warn!(provider = self.provider.name(), "classification failed: {e}");
                Classification {
                    descriptor: IntentDescriptor::fallback(),
                    degraded: true,
                }
            }
            Err(_) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    "classification timed out"
                );
                Classification {
                    descriptor: IntentDescriptor::fallback(),
                    degraded: true,
                }
            }
        }
    }
}
