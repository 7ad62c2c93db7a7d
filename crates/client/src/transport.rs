//! Transport trait: the boundary to the remote object store.
//!
//! The caller implements `Transport` on top of its HTTP client. Wire
//! encoding, authentication, timeouts and retries all live behind it;
//! the core only sees acknowledgements and raw payload bytes.

use std::future::Future;
use std::pin::Pin;

use chunkdrive_protocol::{
    Ack, ChunkUpload, CommitRequest, FileTransferMetadata, RegisterRequest, Registration,
};

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Failures reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The call could not be completed (network, HTTP, encoding).
    #[error("transport failure: {0}")]
    Failed(String),

    /// The transport gave up waiting for the remote side.
    #[error("timed out")]
    Timeout,

    /// A commit referenced a version older than the remote one.
    #[error("version conflict (remote version {current:?})")]
    VersionConflict { current: Option<i64> },
}

/// Abstract connection to the remote object store.
///
/// Implementations must be safe to call concurrently: chunk uploads and
/// downloads for one file may be in flight at the same time.
pub trait Transport: Send + Sync {
    /// Registers file metadata (create or modify) and returns the file id
    /// and initial version.
    fn register_metadata<'a>(
        &'a self,
        request: &'a RegisterRequest,
    ) -> TransportFuture<'a, Ack<Registration>>;

    /// Uploads one chunk's bytes.
    fn upload_chunk_bytes(&self, chunk: ChunkUpload) -> TransportFuture<'_, Ack<()>>;

    /// Finalizes the file at `request.version`.
    ///
    /// Must fail with [`TransportError::VersionConflict`] when the version
    /// is stale.
    fn commit<'a>(
        &'a self,
        request: &'a CommitRequest,
    ) -> TransportFuture<'a, Ack<FileTransferMetadata>>;

    /// Fetches the encoded payload of a chunk by its remote handle.
    fn download_chunk_bytes<'a>(&'a self, remote_handle: &'a str) -> TransportFuture<'a, Vec<u8>>;
}
