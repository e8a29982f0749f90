pub mod backend;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod parser;
pub mod store;

// Re-export key types
pub use backend::{ModelAdapter, RateLimiter, RigBackend, TextBackend};
pub use conversation::{Agent, Conversation, Message};
pub use engine::{EngineSettings, TurnEngine};
pub use error::{BackendError, EngineError, StoreError};
pub use parser::{parse_response, parse_response_for, AgentResponse, ResponseParser};
pub use store::{ConversationStore, ConversationSummary};
