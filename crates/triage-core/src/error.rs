use thiserror::Error;

use crate::types::TaskState;

#[derive(Debug, Error)]
pub enum Error {
    /// The embedding backend could not produce vectors for the corpus.
    #[error("Index build failed: {0}")]
    IndexBuild(String),

    /// Search or re-ranking backend failure.
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// A single corpus or diagnosis record is missing required fields.
    #[error("Malformed {kind} record: {reason}")]
    MalformedRecord { kind: &'static str, reason: String },

    #[error("Pipeline failed for task {task_id}: {reason}")]
    Pipeline { task_id: String, reason: String },

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition { task_id: String, from: TaskState, to: TaskState },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord { kind, reason: reason.into() }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
