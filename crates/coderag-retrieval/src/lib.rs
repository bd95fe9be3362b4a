//! Retrieval sources: one uniform contract over graph traversal, vector search,
//! entity analysis and the indexing service.

pub mod agent;
pub mod analysis;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod source;
pub mod types;
pub mod vector;

pub use agent::{AgentClient, AgentError};
pub use analysis::{AnalysisBackend, AnalysisRetriever, FunctionAnalysis};
pub use error::RetrievalError;
pub use graph::{GraphBackend, GraphEntity, GraphNeighborhood, GraphRetriever, RelatedEntity};
pub use indexer::{IndexOperation, IndexStatus, IndexerBackend, IndexerSource};
pub use source::{BoxFuture, RetrievalRequest, RetrievalSource, with_budget};
pub use types::{Locator, Provenance, RetrievalResult, SourceItem, SourceKind};
pub use vector::{NoReranker, Reranker, VectorBackend, VectorChunk, VectorRetriever};
