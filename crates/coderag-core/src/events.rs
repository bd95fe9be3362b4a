use coderag_memory::SessionId;
use coderag_retrieval::SourceKind;
use serde::Serialize;

use crate::coordinator::OutcomeSummary;
use crate::intent::Intent;
use crate::orchestrator::{QueryResponse, Stage};
use crate::text::chunk_chars;

/// Maximum characters per streamed answer chunk.
pub const CHUNK_CHARS: usize = 50;

/// Progress of one streamed query.
///
/// Emitted in causal order: `session_created` (new sessions only), `thinking`,
/// `routed`, one `partial_result` per source, `chunk`s, then always `complete`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    SessionCreated {
        session_id: SessionId,
    },
    Thinking {
        stage: Stage,
    },
    Routed {
        intent: Intent,
        confidence: f32,
        sources: Vec<SourceKind>,
        parallel: bool,
    },
    PartialResult(OutcomeSummary),
    Chunk {
        text: String,
    },
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Box<QueryResponse>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl QueryEvent {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Split answer text into `chunk` events.
#[must_use]
pub fn answer_chunks(text: &str) -> Vec<QueryEvent> {
    chunk_chars(text, CHUNK_CHARS)
        .into_iter()
        .map(|c| QueryEvent::Chunk { text: c.to_owned() })
        .collect()
}

#[cfg(test)]
mod tests {
    use coderag_retrieval::SourceKind;

    use super::*;
    use crate::coordinator::OutcomeStatus;

    #[test]
    fn chunks_are_bounded() {
        let text = "a".repeat(120);
        let events = answer_chunks(&text);
        assert_eq!(events.len(), 3);
        for e in &events {
            let QueryEvent::Chunk { text } = e else {
                panic!("expected chunk");
            };
            assert!(text.chars().count() <= CHUNK_CHARS);
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(QueryEvent::Thinking {
            stage: Stage::Classified,
        })
        .unwrap();
        assert_eq!(json["type"], "thinking");
        assert_eq!(json["stage"], "classified");

        let partial = QueryEvent::PartialResult(OutcomeSummary {
            source: SourceKind::Graph,
            status: OutcomeStatus::Ok,
            items: 3,
            error: None,
            elapsed_ms: 12,
        });
        let json = serde_json::to_value(partial).unwrap();
        assert_eq!(json["type"], "partial_result");
        assert_eq!(json["source"], "graph");
        assert_eq!(json["items"], 3);
    }

    #[test]
    fn complete_with_error_omits_response() {
        let json = serde_json::to_value(QueryEvent::Complete {
            response: None,
            error: Some("session not found".into()),
        })
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert!(json.get("response").is_none());
        assert_eq!(json["error"], "session not found");
    }
}
