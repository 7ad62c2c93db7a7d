//! In-process [`Transport`] backed by a map.
//!
//! Behaves like a small object store: registration assigns ids and
//! versions, chunks are checked against the registered descriptors, and
//! commit assigns remote handles. Used for loopback transfers and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chunkdrive_protocol::{
    Ack, ChunkUpload, CommitRequest, FileTransferMetadata, RegisterMode, RegisterRequest,
    Registration, encode_chunk_payload,
};
use tracing::debug;

use crate::transport::{Transport, TransportError, TransportFuture};

/// Result code for calls that name an unknown file.
pub const CODE_UNKNOWN_FILE: i64 = 404;
/// Result code for a chunk that does not match its descriptor.
pub const CODE_BAD_CHUNK: i64 = 400;
/// Result code for a commit with chunks still missing.
pub const CODE_INCOMPLETE: i64 = 412;

#[derive(Debug)]
struct StoredFile {
    metadata: FileTransferMetadata,
    /// Version the next commit must present.
    version: i64,
    pending: HashMap<i64, Vec<u8>>,
}

#[derive(Debug, Default)]
struct Store {
    next_id: i64,
    files: HashMap<i64, StoredFile>,
    blobs: HashMap<String, Vec<u8>>,
    reject_registrations: Option<i64>,
    failing_handles: HashSet<String>,
}

/// Map-backed object store.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    store: Mutex<Store>,
    upload_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed metadata of `file_id`, with remote handles.
    pub fn metadata(&self, file_id: i64) -> Option<FileTransferMetadata> {
        let store = self.lock();
        store.files.get(&file_id).map(|f| f.metadata.clone())
    }

    /// Simulates another writer committing `file_id`.
    pub fn bump_version(&self, file_id: i64) {
        if let Some(file) = self.lock().files.get_mut(&file_id) {
            file.version += 1;
        }
    }

    /// Makes every later registration fail with `code`.
    pub fn reject_registrations_with(&self, code: i64) {
        self.lock().reject_registrations = Some(code);
    }

    /// Makes fetches of `handle` fail.
    pub fn fail_download(&self, handle: &str) {
        self.lock().failing_handles.insert(handle.to_string());
    }

    /// Number of chunk upload calls received.
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Highest number of chunk calls seen running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, request: &RegisterRequest) -> Result<Ack<Registration>, TransportError> {
        let mut store = self.lock();
        if let Some(code) = store.reject_registrations {
            return Ok(Ack::rejected(code));
        }

        let meta = &request.metadata;
        let (file_id, version) = match request.mode {
            RegisterMode::Create => {
                store.next_id += 1;
                (store.next_id, 1)
            }
            RegisterMode::Modify => {
                let Some(file_id) = meta.id else {
                    return Ok(Ack::rejected(CODE_UNKNOWN_FILE));
                };
                let Some(existing) = store.files.get(&file_id) else {
                    return Ok(Ack::rejected(CODE_UNKNOWN_FILE));
                };
                if meta.version != Some(existing.version) {
                    return Err(TransportError::VersionConflict {
                        current: Some(existing.version),
                    });
                }
                (file_id, existing.version)
            }
        };

        let mut metadata = meta.clone();
        metadata.id = Some(file_id);
        metadata.version = Some(version);
        store.files.insert(
            file_id,
            StoredFile {
                metadata,
                version,
                pending: HashMap::new(),
            },
        );
        debug!(file_id, version, mode = ?request.mode, "memory store: registered");
        Ok(Ack::accepted(Registration { file_id, version }))
    }

    fn accept_chunk(&self, chunk: ChunkUpload) -> Ack<()> {
        let mut store = self.lock();
        let Some(file) = store.files.get_mut(&chunk.file_id) else {
            return Ack::rejected(CODE_UNKNOWN_FILE);
        };
        let Some(descriptor) = file.metadata.chunk(chunk.chunk_index) else {
            return Ack::rejected(CODE_BAD_CHUNK);
        };
        if descriptor.size != chunk.length || chunk.data.len() as u64 != chunk.length {
            return Ack::rejected(CODE_BAD_CHUNK);
        }
        file.pending.insert(chunk.chunk_index, chunk.data);
        Ack::accepted(())
    }

    fn finalize(
        &self,
        request: &CommitRequest,
    ) -> Result<Ack<FileTransferMetadata>, TransportError> {
        let mut store = self.lock();
        let Store { files, blobs, .. } = &mut *store;
        let Some(file) = files.get_mut(&request.file_id) else {
            return Ok(Ack::rejected(CODE_UNKNOWN_FILE));
        };
        if request.version != file.version {
            return Err(TransportError::VersionConflict {
                current: Some(file.version),
            });
        }
        if file.metadata.chunks.len() != file.pending.len() {
            return Ok(Ack::rejected(CODE_INCOMPLETE));
        }

        let version = file.version + 1;
        let handles: Vec<String> = file
            .metadata
            .chunks
            .iter()
            .map(|c| format!("{}-{}-{}", request.file_id, version, c.index))
            .collect();
        for (chunk, handle) in file.metadata.chunks.iter().zip(&handles) {
            if let Some(data) = file.pending.remove(&chunk.index) {
                blobs.insert(handle.clone(), data);
            }
        }

        let mut committed = file.metadata.with_remote_handles(handles);
        committed.version = Some(version);
        file.metadata = committed.clone();
        file.version = version;
        debug!(file_id = request.file_id, version, "memory store: committed");
        Ok(Ack::accepted(committed))
    }

    fn fetch(&self, handle: &str) -> Result<Vec<u8>, TransportError> {
        let store = self.lock();
        if store.failing_handles.contains(handle) {
            return Err(TransportError::Failed(format!("fetch of {handle} failed")));
        }
        store
            .blobs
            .get(handle)
            .map(|data| encode_chunk_payload(data))
            .ok_or_else(|| TransportError::Failed(format!("unknown handle {handle}")))
    }

    async fn track<T>(&self, work: impl FnOnce() -> T) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        // Let sibling calls start so overlap is observable.
        tokio::task::yield_now().await;
        let out = work();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

impl Transport for MemoryTransport {
    fn register_metadata<'a>(
        &'a self,
        request: &'a RegisterRequest,
    ) -> TransportFuture<'a, Ack<Registration>> {
        Box::pin(async move { self.register(request) })
    }

    fn upload_chunk_bytes(&self, chunk: ChunkUpload) -> TransportFuture<'_, Ack<()>> {
        Box::pin(async move {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.track(|| self.accept_chunk(chunk)).await)
        })
    }

    fn commit<'a>(
        &'a self,
        request: &'a CommitRequest,
    ) -> TransportFuture<'a, Ack<FileTransferMetadata>> {
        Box::pin(async move { self.finalize(request) })
    }

    fn download_chunk_bytes<'a>(&'a self, remote_handle: &'a str) -> TransportFuture<'a, Vec<u8>> {
        Box::pin(async move { self.track(|| self.fetch(remote_handle)).await })
    }
}
