//! Client error types.

use crate::transport::TransportError;

/// Errors produced while uploading or downloading a file.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkdrive_transfer::TransferError),

    #[error("chunk {index} payload error: {source}")]
    Payload {
        index: i64,
        #[source]
        source: chunkdrive_protocol::PayloadError,
    },

    #[error("{context} (remote error code {code})")]
    Remote { code: i64, context: String },

    #[error("version conflict committing file {file_id} at version {version}")]
    VersionConflict { file_id: i64, version: i64 },

    #[error("{step} failed: {source}")]
    Transport {
        step: String,
        #[source]
        source: TransportError,
    },

    #[error("chunk {index} has no remote handle")]
    MissingHandle { index: i64 },

    #[error("cancelled")]
    Cancelled,

    #[error("task error: {0}")]
    Task(String),
}

impl ClientError {
    /// Returns `true` when a commit lost an optimistic-concurrency race.
    ///
    /// The caller may re-fetch metadata and retry.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, ClientError::VersionConflict { .. })
    }
}

/// Errors produced while loading client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
