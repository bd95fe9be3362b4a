//! Text-generation capability used for intent classification and answer synthesis.

pub mod any;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub(crate) mod retry;

pub use error::LlmError;
pub use provider::{LlmProvider, Message, Role};
