//! Transfer error types.

use std::path::PathBuf;

/// Errors that end a single upload or download attempt.
///
/// None of these are retried. A failed download leaves whatever was already
/// written on disk, so calling download again resumes from there.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("cannot access {}: {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Network {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("response stream interrupted: {0}")]
    StreamInterrupted(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("download task failed: {0}")]
    Task(String),
}

impl TransferError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn network(context: &'static str, source: reqwest::Error) -> Self {
        Self::Network { context, source }
    }

    /// True for connection-level failures, including a body stream cut short.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::StreamInterrupted(_))
    }
}
