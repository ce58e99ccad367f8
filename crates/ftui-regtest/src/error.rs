use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegtestError>;

#[derive(Debug, Error)]
pub enum RegtestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("golden file storage failed for {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("captured output of {identity} contains unprintable character {found:?} at byte {offset}")]
    UnprintableOutput {
        identity: String,
        offset: usize,
        found: String,
    },

    #[error("invalid normalization pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex_lite::Error,
    },

    #[error("stdout of this thread is already captured by another regtest buffer")]
    RedirectActive,

    #[error("regression test output differs for {identity}")]
    Mismatch { identity: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl RegtestError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Mismatch { .. } => 1,
            _ => 2,
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}
