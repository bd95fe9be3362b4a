use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentError;
use crate::error::RetrievalError;
use crate::source::{BoxFuture, RetrievalRequest, RetrievalSource, with_budget};
use crate::types::{Provenance, RetrievalResult, SourceItem, SourceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub name: String,
    pub entity_type: Option<String>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity: GraphEntity,
    pub relationship: Option<String>,
}

/// An entity and its direct neighbours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphNeighborhood {
    pub focus: Option<GraphEntity>,
    pub related: Vec<RelatedEntity>,
}

impl GraphNeighborhood {
    /// Render the focus and its edges as a Mermaid `graph TD` block.
    ///
    /// `None` when there is no focus or nothing is connected to it.
    #[must_use]
    pub fn to_mermaid(&self) -> Option<String> {
        let mut diagram = Diagram::default();
        diagram.add(self);
        diagram.render()
    }
}

const MAX_DIAGRAM_EDGES: usize = 20;

/// Edges from several neighbourhoods merged into one diagram, nodes deduplicated by name.
#[derive(Default)]
struct Diagram {
    nodes: Vec<String>,
    edges: Vec<(usize, usize, String)>,
}

impl Diagram {
    fn node(&mut self, name: &str) -> usize {
        if let Some(i) = self.nodes.iter().position(|n| n == name) {
            return i;
        }
        self.nodes.push(name.to_owned());
        self.nodes.len() - 1
    }

    fn add(&mut self, hood: &GraphNeighborhood) {
        let Some(focus) = &hood.focus else {
            return;
        };
        for rel in &hood.related {
            if self.edges.len() == MAX_DIAGRAM_EDGES {
                return;
            }
            let from = self.node(&focus.name);
            let to = self.node(&rel.entity.name);
            let label = rel.relationship.as_deref().unwrap_or("RELATED").to_owned();
            if !self.edges.iter().any(|e| e.0 == from && e.1 == to && e.2 == label) {
                self.edges.push((from, to, label));
            }
        }
    }

    fn render(&self) -> Option<String> {
        if self.edges.is_empty() {
            return None;
        }
        let mut out = String::from("graph TD");
        for (i, name) in self.nodes.iter().enumerate() {
            out.push_str(&format!("\n    n{i}[\"{}\"]", escape_label(name)));
        }
        for (from, to, label) in &self.edges {
            out.push_str(&format!("\n    n{from} -->|{}| n{to}", escape_label(label)));
        }
        Some(out)
    }
}

fn escape_label(s: &str) -> String {
    s.replace('"', "#quot;").replace('|', "#124;")
}

pub trait GraphBackend: Send + Sync {
    /// Look up `entity_name` and the entities connected to it.
    fn neighborhood(
        &self,
        entity_name: &str,
        relationship: Option<&str>,
    ) -> impl Future<Output = Result<GraphNeighborhood, AgentError>> + Send;
}

const FOCUS_SCORE: f32 = 0.9;
const EXACT_FOCUS_SCORE: f32 = 1.0;
const RELATED_SCORE: f32 = 0.75;
const RELATED_DECAY: f32 = 0.05;
const RELATED_FLOOR: f32 = 0.2;

#[allow(clippy::cast_precision_loss)]
fn related_score(position: usize) -> f32 {
    (RELATED_SCORE - RELATED_DECAY * position as f32).max(RELATED_FLOOR)
}

fn describe(entity: &GraphEntity) -> String {
    let mut out = format!(
        "{} `{}`",
        entity.entity_type.as_deref().unwrap_or("Entity"),
        entity.name
    );
    for (key, value) in &entity.properties {
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::String(s) => out.push_str(&format!("\n{key}: {s}")),
            other => out.push_str(&format!("\n{key}: {other}")),
        }
    }
    out
}

fn provenance(entity: &GraphEntity) -> Provenance {
    Provenance::entity(SourceKind::Graph, &entity.name, entity.entity_type.clone())
}

/// Symbolic retrieval over the code knowledge graph.
pub struct GraphRetriever<B> {
    backend: B,
    relationship: Option<String>,
}

impl<B: GraphBackend> GraphRetriever<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            relationship: None,
        }
    }

    /// Only follow edges of this relationship type.
    #[must_use]
    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = Some(relationship.into());
        self
    }

    async fn collect(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        let mut items = Vec::new();
        let mut tools_used = Vec::new();
        let mut seen = HashSet::new();
        let mut last_error = None;
        let mut diagram = Diagram::default();

        for name in request.lookup_names() {
            tools_used.push(format!("neighborhood({name})"));
            let hood = match self
                .backend
                .neighborhood(name, self.relationship.as_deref())
                .await
            {
                Ok(hood) => hood,
                Err(e) => {
                    tracing::warn!(source = "graph", entity = name, "lookup failed: {e}");
                    last_error = Some(e);
                    continue;
                }
            };
            diagram.add(&hood);

            if let Some(focus) = hood.focus
                && seen.insert(focus.name.clone())
            {
                let score = if focus.name.eq_ignore_ascii_case(name) {
                    EXACT_FOCUS_SCORE
                } else {
                    FOCUS_SCORE
                };
                items.push(SourceItem::new(provenance(&focus), describe(&focus), score));
            }

            for (i, rel) in hood.related.iter().enumerate() {
                if !seen.insert(rel.entity.name.clone()) {
                    continue;
                }
                let mut content = describe(&rel.entity);
                if let Some(kind) = &rel.relationship {
                    content.push_str(&format!("\nrelated to `{name}` via {kind}"));
                }
                items.push(SourceItem::new(
                    provenance(&rel.entity),
                    content,
                    related_score(i),
                ));
            }
        }

        if items.is_empty()
            && let Some(e) = last_error
        {
            return Err(RetrievalError::failed(SourceKind::Graph, e.to_string()));
        }
        Ok(RetrievalResult::ranked(SourceKind::Graph, items, tools_used)
            .with_diagram(diagram.render()))
    }
}

impl<B: GraphBackend> RetrievalSource for GraphRetriever<B> {
    fn kind(&self) -> SourceKind {
        SourceKind::Graph
    }

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrievalRequest,
        budget: Duration,
    ) -> BoxFuture<'a, Result<RetrievalResult, RetrievalError>> {
        Box::pin(with_budget(SourceKind::Graph, budget, self.collect(request)))
    }
}
