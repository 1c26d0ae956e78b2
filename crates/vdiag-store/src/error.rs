//! Knowledge store errors

use std::path::PathBuf;

use thiserror::Error;
use vdiag_core::DiagError;
use vdiag_rules::GrammarError;

/// Errors that can occur while reading or appending knowledge
#[derive(Debug, Error)]
pub enum StoreError {
    /// New rule text did not compile; nothing was written
    #[error("learned rule text failed validation: {0}")]
    Validation(#[from] GrammarError),

    /// Persisted file no longer compiles
    #[error("knowledge file {} is corrupted: {source}", path.display())]
    Corrupted {
        path: PathBuf,
        #[source]
        source: GrammarError,
    },

    /// Another session held the file lock for every attempt
    #[error("could not lock {} after {attempts} attempts", path.display())]
    LockContention { path: PathBuf, attempts: u32 },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Blocking file task panicked or was cancelled
    #[error("knowledge store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for DiagError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(grammar) => grammar.into(),
            StoreError::Corrupted { path, source } => DiagError::CorruptedKnowledge {
                path: path.display().to_string(),
                message: source.to_string(),
            },
            StoreError::LockContention { path, attempts } => DiagError::StoreLockContention(
                format!("{} ({} attempts)", path.display(), attempts),
            ),
            other => DiagError::Internal(other.to_string()),
        }
    }
}
