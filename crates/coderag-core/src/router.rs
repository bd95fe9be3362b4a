use coderag_retrieval::SourceKind;
use serde::Serialize;

use crate::intent::{Intent, IntentDescriptor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Add vector search after the symbolic sources for `search` and `explain`.
    pub vector_augment: bool,
}

/// Sources to consult, in tie-break precedence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub sources: Vec<SourceKind>,
    pub parallel: bool,
}

impl Route {
    fn new(sources: Vec<SourceKind>) -> Self {
        let parallel = sources.len() > 1;
        Self { sources, parallel }
    }

    /// Position of `kind` in the route, or `usize::MAX` when absent.
    #[must_use]
    pub fn precedence(&self, kind: SourceKind) -> usize {
        self.sources
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(usize::MAX)
    }
}

/// Map an intent to its source set. Pure; never touches a source.
#[must_use]
pub fn route(descriptor: &IntentDescriptor, policy: RoutingPolicy) -> Route {
    use SourceKind::{Analysis, Graph, Indexer, Vector};

    let mut sources = match descriptor.intent {
        Intent::Search => vec![Graph],
        Intent::Explain => vec![Graph, Analysis],
        Intent::Analyze => vec![Analysis, Graph],
        Intent::Index | Intent::Embed | Intent::Stats => vec![Indexer],
    };
    if policy.vector_augment && matches!(descriptor.intent, Intent::Search | Intent::Explain) {
        sources.push(Vector);
    }
    Route::new(sources)
}
