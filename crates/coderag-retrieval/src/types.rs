use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Graph,
    Vector,
    Analysis,
    Indexer,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Graph => "graph",
            Self::Vector => "vector",
            Self::Analysis => "analysis",
            Self::Indexer => "indexer",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where inside the source a piece of evidence lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    File {
        path: String,
        start_line: Option<u32>,
        end_line: Option<u32>,
    },
    Entity {
        id: String,
        entity_type: Option<String>,
    },
    Note {
        label: String,
    },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File {
                path,
                start_line: Some(start),
                end_line: Some(end),
            } => write!(f, "{path}:{start}-{end}"),
            Self::File {
                path,
                start_line: Some(start),
                ..
            } => write!(f, "{path}:{start}"),
            Self::File { path, .. } => f.write_str(path),
            Self::Entity {
                id,
                entity_type: Some(ty),
            } => write!(f, "{ty} {id}"),
            Self::Entity { id, .. } => f.write_str(id),
            Self::Note { label } => f.write_str(label),
        }
    }
}

/// Provenance tag. Carried unchanged from retrieval through to citations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: SourceKind,
    pub locator: Locator,
}

impl Provenance {
    #[must_use]
    pub fn entity(source: SourceKind, id: impl Into<String>, entity_type: Option<String>) -> Self {
        Self {
            source,
            locator: Locator::Entity {
                id: id.into(),
                entity_type,
            },
        }
    }

    #[must_use]
    pub fn file(
        source: SourceKind,
        path: impl Into<String>,
        start_line: Option<u32>,
        end_line: Option<u32>,
    ) -> Self {
        Self {
            source,
            locator: Locator::File {
                path: path.into(),
                start_line,
                end_line,
            },
        }
    }

    #[must_use]
    pub fn note(source: SourceKind, label: impl Into<String>) -> Self {
        Self {
            source,
            locator: Locator::Note {
                label: label.into(),
            },
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source, self.locator)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub provenance: Provenance,
    pub content: String,
    /// Relevance in `[0, 1]`.
    pub score: f32,
}

impl SourceItem {
    /// Build an item, clamping `score` into `[0, 1]` (NaN becomes 0).
    #[must_use]
    pub fn new(provenance: Provenance, content: impl Into<String>, score: f32) -> Self {
        let score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        };
        Self {
            provenance,
            content: content.into(),
            score,
        }
    }
}

/// One source's answer to one request, sorted by descending score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    source: SourceKind,
    items: Vec<SourceItem>,
    tools_used: Vec<String>,
    /// Mermaid rendering of what the source looked at, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    diagram: Option<String>,
}

impl RetrievalResult {
    /// Sort `items` descending by score. Equal scores keep their insertion order.
    #[must_use]
    pub fn ranked(source: SourceKind, mut items: Vec<SourceItem>, tools_used: Vec<String>) -> Self {
        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        Self {
            source,
            items,
            tools_used,
            diagram: None,
        }
    }

    #[must_use]
    pub fn with_diagram(mut self, diagram: Option<String>) -> Self {
        self.diagram = diagram;
        self
    }

    #[must_use]
    pub fn empty(source: SourceKind) -> Self {
        Self::ranked(source, Vec::new(), Vec::new())
    }

    #[must_use]
    pub fn source(&self) -> SourceKind {
        self.source
    }

    #[must_use]
    pub fn items(&self) -> &[SourceItem] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<SourceItem> {
        self.items
    }

    #[must_use]
    pub fn tools_used(&self) -> &[String] {
        &self.tools_used
    }

    #[must_use]
    pub fn diagram(&self) -> Option<&str> {
        self.diagram.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn item(label: &str, score: f32) -> SourceItem {
        SourceItem::new(Provenance::note(SourceKind::Graph, label), label, score)
    }

    #[test]
    fn score_is_clamped() {
        assert!((item("a", 1.7).score - 1.0).abs() < f32::EPSILON);
        assert!(item("b", -0.2).score.abs() < f32::EPSILON);
        assert!(item("c", f32::NAN).score.abs() < f32::EPSILON);
    }

    #[test]
    fn ranked_sorts_descending_and_keeps_tie_order() {
        let result = RetrievalResult::ranked(
            SourceKind::Graph,
            vec![item("a", 0.5), item("b", 0.9), item("c", 0.5), item("d", 0.7)],
            vec![],
        );
        let labels: Vec<&str> = result.items().iter().map(|i| i.content.as_str()).collect();
        assert_eq!(labels, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn provenance_display() {
        let p = Provenance::file(SourceKind::Vector, "src/lib.rs", Some(10), Some(20));
        assert_eq!(p.to_string(), "[vector] src/lib.rs:10-20");
        let p = Provenance::entity(SourceKind::Graph, "parse", Some("Function".into()));
        assert_eq!(p.to_string(), "[graph] Function parse");
    }

    #[test]
    fn locator_serializes_tagged() {
        let json = serde_json::to_value(Locator::Note {
            label: "index".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"kind": "note", "label": "index"}));
    }

    proptest! {
        #[test]
        fn ranked_is_sorted_permutation(scores in proptest::collection::vec(0.0f32..=1.0, 0..40)) {
            let items: Vec<SourceItem> = scores
                .iter()
                .enumerate()
                .map(|(i, s)| item(&i.to_string(), *s))
                .collect();
            let result = RetrievalResult::ranked(SourceKind::Vector, items, vec![]);

            prop_assert_eq!(result.len(), scores.len());
            for pair in result.items().windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
                if pair[0].score.total_cmp(&pair[1].score) == std::cmp::Ordering::Equal {
                    let a: usize = pair[0].content.parse().unwrap();
                    let b: usize = pair[1].content.parse().unwrap();
                    prop_assert!(a < b);
                }
            }
        }
    }
}
