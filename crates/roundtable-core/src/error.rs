use thiserror::Error;

/// Integrity and I/O failures from the conversation store. Always fatal
/// to the operation that raised them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} '{id}' already exists")]
    DuplicateKey { entity: &'static str, id: String },

    #[error("{entity} references unknown {reference}")]
    ForeignKeyViolation {
        entity: &'static str,
        reference: String,
    },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the turn engine to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("conversation '{0}' not found")]
    ConversationNotFound(String),

    #[error("agent index {index} out of range ({count} agents)")]
    AgentIndexOutOfRange { index: usize, count: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A failed call to a text generation backend. Never leaves the adapter.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("backend returned an empty response")]
    EmptyResponse,
}
