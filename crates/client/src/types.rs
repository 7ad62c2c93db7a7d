//! Data types for upload and download flows.

use chunkdrive_protocol::RegisterMode;
use chunkdrive_transfer::RemoteFile;

/// Where an upload lands on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    /// Create a new file in folder `dir_id`.
    Create { dir_id: i64 },
    /// Replace the contents of an existing file, carrying `version` forward.
    Modify {
        file_id: i64,
        dir_id: i64,
        version: i64,
    },
}

impl UploadTarget {
    pub fn dir_id(&self) -> i64 {
        match *self {
            UploadTarget::Create { dir_id } | UploadTarget::Modify { dir_id, .. } => dir_id,
        }
    }

    pub fn mode(&self) -> RegisterMode {
        match self {
            UploadTarget::Create { .. } => RegisterMode::Create,
            UploadTarget::Modify { .. } => RegisterMode::Modify,
        }
    }

    pub(crate) fn existing(&self) -> Option<RemoteFile> {
        match *self {
            UploadTarget::Create { .. } => None,
            UploadTarget::Modify {
                file_id, version, ..
            } => Some(RemoteFile {
                id: file_id,
                version,
            }),
        }
    }
}

/// Progress of a single upload through its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UploadState {
    /// Metadata and chunk plan computed locally.
    Prepared,
    /// The remote side accepted the metadata.
    MetadataRegistered,
    /// Every chunk was accepted.
    ChunksUploaded,
    /// The commit succeeded. Terminal.
    Committed,
}

/// Event emitted while a transfer runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// An upload entered a new state.
    Stage { file: String, state: UploadState },
    /// One chunk was accepted by the remote side.
    ChunkUploaded { file: String, index: i64, bytes: u64 },
    /// One chunk was fetched, verified and written.
    ChunkDownloaded { file: String, index: i64, bytes: u64 },
    /// The transfer finished successfully.
    Completed { file: String },
    /// The transfer failed.
    Failed { file: String, error: String },
}
