//! Tiered conversation memory: an append-only SQLite log fronted by a hot cache.

pub mod cache;
pub mod error;
pub mod sqlite;
pub mod store;
pub mod types;

pub use cache::{CacheError, InMemoryTurnCache, TurnCache};
pub use error::MemoryError;
pub use store::ConversationStore;
pub use types::{
    AgentResponse, AgentResponseId, NewAgentResponse, Session, SessionId, Turn, TurnId, TurnRole,
};
