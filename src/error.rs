use thiserror::Error;

use crate::storage::StorageError;

/// Domain rule violations. Each one is checked before any mutation, so a
/// rejected operation leaves history untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("only the most recent user message can be edited (index {index})")]
    NotLatestUserMessage { index: usize },

    #[error("message {index} is not a user message")]
    NotUserMessage { index: usize },

    #[error("message {index} is not an assistant message")]
    NotAssistantMessage { index: usize },

    #[error("message content must not be empty")]
    EmptyContent,

    #[error("no user message precedes assistant message {index}")]
    NoPrecedingUserMessage { index: usize },

    #[error("cannot delete the last remaining session")]
    LastSession,

    #[error("index {index} is out of bounds (len {len})")]
    InvalidIndex { index: usize, len: usize },

    #[error("a response is already streaming for this session")]
    TurnInProgress,

    #[error("no session is active")]
    NoActiveSession,
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing client or credentials. The turn never starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport or parse failure while a response was streaming.
    #[error("stream error: {0:#}")]
    Stream(anyhow::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ChatResult<T> = Result<T, ChatError>;
