//! Query orchestration: classify a question, route it to retrieval sources,
//! fan out under a time budget and synthesize a cited answer.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod intent;
pub mod orchestrator;
pub mod router;
pub mod synthesizer;
pub mod text;

pub use config::Config;
pub use coordinator::{ExecutionCoordinator, ExecutionReport, SourceOutcome, SourceRegistry};
pub use error::OrchestratorError;
pub use events::QueryEvent;
pub use intent::{Intent, IntentClassifier, IntentDescriptor};
pub use orchestrator::{Diagnostics, Orchestrator, QueryRequest, QueryResponse, Stage};
pub use router::{Route, RoutingPolicy};
pub use synthesizer::{Citation, SynthesizedAnswer, Synthesizer};
