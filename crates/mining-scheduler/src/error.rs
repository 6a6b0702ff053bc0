//! Scheduler error types.

use thiserror::Error;

use mining_core::{DownloadHandle, IdentifierError, SourceKey};

/// Errors raised by registry operations.
///
/// The public manager surface logs these instead of returning them;
/// they exist so each rejection path can be told apart.
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("malformed source key {key:?}: {source}")]
    MalformedSource {
        key: String,
        #[source]
        source: IdentifierError,
    },

    #[error("source already active: {0}")]
    DuplicateSource(SourceKey),

    #[error("unknown source: {0}")]
    UnknownSource(String),
}

/// Failures reported by the download engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("download not found: {0}")]
    DownloadNotFound(DownloadHandle),

    #[error("engine I/O error: {0}")]
    Io(String),
}

pub type MiningResult<T> = Result<T, MiningError>;
