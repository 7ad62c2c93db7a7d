//! Download executor: fetch chunks by handle and reassemble the file.

use std::path::{Path, PathBuf};

use chunkdrive_protocol::{ChunkDescriptor, FileTransferMetadata, decode_chunk_payload};
use chunkdrive_transfer::{ChunkAssembler, TransferError, validate_chunk_chain};
use futures_util::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::Transport;
use crate::types::TransferEvent;

/// Downloads files described by committed metadata.
pub struct DownloadExecutor<'a> {
    transport: &'a dyn Transport,
    config: ClientConfig,
    cancel: CancellationToken,
    events_tx: Option<mpsc::Sender<TransferEvent>>,
}

impl<'a> DownloadExecutor<'a> {
    pub fn new(transport: &'a dyn Transport, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
            events_tx: None,
        }
    }

    /// Sends progress events to `events_tx`. The receiver must be drained;
    /// a full channel pauses the download.
    pub fn with_events(mut self, events_tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Downloads `metadata` to `destination` and returns the final path.
    ///
    /// The metadata is checked before anything is written. Bytes are
    /// assembled in `<destination>.tmp`; on any failure that file is left
    /// in place and `destination` is not touched.
    pub async fn execute(
        &self,
        metadata: &FileTransferMetadata,
        destination: &Path,
    ) -> Result<PathBuf, ClientError> {
        let file = metadata.full_name.clone();
        match self.run(metadata, destination).await {
            Ok(path) => {
                self.emit(TransferEvent::Completed { file: file.clone() })
                    .await;
                info!(
                    file = %file,
                    path = %path.display(),
                    bytes = metadata.size_bytes,
                    "download complete"
                );
                Ok(path)
            }
            Err(e) => {
                self.emit(TransferEvent::Failed {
                    file: file.clone(),
                    error: e.to_string(),
                })
                .await;
                error!(file = %file, error = %e, "download failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        metadata: &FileTransferMetadata,
        destination: &Path,
    ) -> Result<PathBuf, ClientError> {
        check_metadata(metadata)?;
        self.check_cancelled()?;

        let permission_bits = if metadata.posix_permission_bits < 1 {
            self.config.default_permissions
        } else {
            metadata.posix_permission_bits
        };
        let mut assembler = tokio::task::spawn_blocking({
            let destination = destination.to_path_buf();
            move || ChunkAssembler::create(&destination, permission_bits)
        })
        .await
        .map_err(|e| ClientError::Task(format!("task join error: {e}")))??;
        debug!(
            file = %metadata.full_name,
            temp = %assembler.temp_path().display(),
            chunks = metadata.chunks.len(),
            "assembling download"
        );

        // Fetches run ahead; results come back in index order.
        let max_in_flight = self.config.max_in_flight.max(1);
        let mut fetches = stream::iter(metadata.chunks.iter())
            .map(|chunk| self.fetch_chunk(chunk))
            .buffered(max_in_flight);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
                next = fetches.next() => next,
            };
            let Some(fetched) = next else { break };
            let (chunk, data) = fetched?;
            let bytes = data.len() as u64;

            let (returned, appended) = tokio::task::spawn_blocking(move || {
                let result = assembler.append(&chunk, &data);
                (assembler, result.map(|()| chunk.index))
            })
            .await
            .map_err(|e| ClientError::Task(format!("task join error: {e}")))?;
            assembler = returned;
            let index = appended?;

            self.emit(TransferEvent::ChunkDownloaded {
                file: metadata.full_name.clone(),
                index,
                bytes,
            })
            .await;
        }

        let expected = metadata.whole_file_digest.clone();
        let modified_at_millis = metadata.modified_at_millis;
        let path =
            tokio::task::spawn_blocking(move || assembler.finish(&expected, modified_at_millis))
                .await
                .map_err(|e| ClientError::Task(format!("task join error: {e}")))??;
        Ok(path)
    }

    /// Fetches and decodes one chunk.
    async fn fetch_chunk(
        &self,
        chunk: &ChunkDescriptor,
    ) -> Result<(ChunkDescriptor, Vec<u8>), ClientError> {
        self.check_cancelled()?;
        let handle = chunk
            .remote_handle
            .as_deref()
            .ok_or(ClientError::MissingHandle { index: chunk.index })?;

        let payload = self
            .transport
            .download_chunk_bytes(handle)
            .await
            .map_err(|source| ClientError::Transport {
                step: format!("download chunk {}", chunk.index),
                source,
            })?;
        let data = decode_chunk_payload(&payload).map_err(|source| ClientError::Payload {
            index: chunk.index,
            source,
        })?;

        debug!(index = chunk.index, handle, size = data.len(), "chunk fetched");
        Ok((chunk.clone(), data))
    }

    fn check_cancelled(&self) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Rejects metadata that cannot describe a downloadable file.
fn check_metadata(metadata: &FileTransferMetadata) -> Result<(), ClientError> {
    validate_chunk_chain(&metadata.chunks)?;

    if let Some(chunk) = metadata.chunks.iter().find(|c| c.remote_handle.is_none()) {
        return Err(ClientError::MissingHandle { index: chunk.index });
    }

    let total: u64 = metadata.chunks.iter().map(|c| c.size).sum();
    if total != metadata.size_bytes {
        return Err(TransferError::BrokenChain(format!(
            "chunk sizes sum to {total} bytes, file size is {}",
            metadata.size_bytes
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportFuture};
    use chunkdrive_protocol::{
        Ack, ChunkUpload, CommitRequest, RegisterRequest, Registration, encode_chunk_payload,
    };
    use chunkdrive_transfer::{split_stream, temp_path_for};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves chunk payloads from a map keyed by handle.
    struct MockStore {
        payloads: HashMap<String, Vec<u8>>,
        fetched: Mutex<Vec<String>>,
    }

    impl MockStore {
        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    impl Transport for MockStore {
        fn register_metadata<'a>(
            &'a self,
            _request: &'a RegisterRequest,
        ) -> TransportFuture<'a, Ack<Registration>> {
            Box::pin(async { Err(TransportError::Failed("read-only".into())) })
        }

        fn upload_chunk_bytes(&self, _chunk: ChunkUpload) -> TransportFuture<'_, Ack<()>> {
            Box::pin(async { Err(TransportError::Failed("read-only".into())) })
        }

        fn commit<'a>(
            &'a self,
            _request: &'a CommitRequest,
        ) -> TransportFuture<'a, Ack<FileTransferMetadata>> {
            Box::pin(async { Err(TransportError::Failed("read-only".into())) })
        }

        fn download_chunk_bytes<'a>(&'a self, handle: &'a str) -> TransportFuture<'a, Vec<u8>> {
            Box::pin(async move {
                self.fetched.lock().unwrap().push(handle.to_string());
                self.payloads
                    .get(handle)
                    .cloned()
                    .ok_or_else(|| TransportError::Failed(format!("no chunk {handle}")))
            })
        }
    }

    /// Builds metadata for `data` plus a store holding its encoded chunks.
    fn stored(data: &[u8], chunk_size: usize) -> (FileTransferMetadata, MockStore) {
        let split = split_stream(data, chunk_size).unwrap();
        let meta = FileTransferMetadata {
            id: Some(9),
            dir_id: 1,
            name: "report".into(),
            extension: "txt".into(),
            full_name: "report.txt".into(),
            size_bytes: split.total_bytes,
            modified_at_millis: 1_600_000_000_000,
            posix_permission_bits: 0o644,
            whole_file_digest: split.whole_file_digest,
            chunks: split.chunks,
            version: Some(1),
            changed_by: 61401,
        };
        let meta = meta.with_remote_handles((1..=meta.chunks.len()).map(|i| format!("h{i}")));

        let mut payloads = HashMap::new();
        let mut offset = 0usize;
        for chunk in &meta.chunks {
            let end = offset + chunk.size as usize;
            payloads.insert(
                chunk.remote_handle.clone().unwrap(),
                encode_chunk_payload(&data[offset..end]),
            );
            offset = end;
        }
        let store = MockStore {
            payloads,
            fetched: Mutex::new(Vec::new()),
        };
        (meta, store)
    }

    fn config() -> ClientConfig {
        ClientConfig {
            chunk_size: 4,
            max_in_flight: 3,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn downloads_and_reassembles() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.txt");
        let data = b"chunked download works!";
        let (meta, store) = stored(data, 4);
        let (tx, mut rx) = mpsc::channel(64);

        let exec = DownloadExecutor::new(&store, config()).with_events(tx);
        let path = exec.execute(&meta, &dest).await.unwrap();
        drop(exec);

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(!temp_path_for(&dest).exists());
        assert_eq!(store.fetched().len(), meta.chunks.len());

        let mut indices = Vec::new();
        let mut completed = false;
        while let Some(event) = rx.recv().await {
            match event {
                TransferEvent::ChunkDownloaded { index, .. } => indices.push(index),
                TransferEvent::Completed { .. } => completed = true,
                _ => {}
            }
        }
        assert_eq!(indices, (1..=meta.chunks.len() as i64).collect::<Vec<_>>());
        assert!(completed);
    }

    #[tokio::test]
    async fn empty_file_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("empty");
        let (meta, store) = stored(b"", 4);

        DownloadExecutor::new(&store, config())
            .execute(&meta, &dest)
            .await
            .unwrap();
        assert!(std::fs::read(&dest).unwrap().is_empty());
        assert!(store.fetched().is_empty());
    }

    #[tokio::test]
    async fn missing_handle_rejected_before_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.txt");
        let (mut meta, store) = stored(b"abcdefgh", 4);
        meta.chunks[1].remote_handle = None;

        let err = DownloadExecutor::new(&store, config())
            .execute(&meta, &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingHandle { index: 2 }));
        assert!(!temp_path_for(&dest).exists());
        assert!(store.fetched().is_empty());
    }

    #[tokio::test]
    async fn broken_chain_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut meta, store) = stored(b"abcdefgh", 4);
        meta.chunks[0].next_index = 1;

        let err = DownloadExecutor::new(&store, config())
            .execute(&meta, &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transfer(TransferError::BrokenChain(_))
        ));
    }

    #[tokio::test]
    async fn size_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut meta, store) = stored(b"abcdefgh", 4);
        meta.size_bytes = 9;

        let err = DownloadExecutor::new(&store, config())
            .execute(&meta, &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transfer(TransferError::BrokenChain(_))
        ));
    }

    #[tokio::test]
    async fn failed_fetch_leaves_temp_and_no_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("report.txt");
        let (meta, mut store) = stored(b"abcdefghijkl", 4);
        store.payloads.remove("h3");

        let err = DownloadExecutor::new(&store, config())
            .execute(&meta, &dest)
            .await
            .unwrap_err();
        match err {
            ClientError::Transport { step, .. } => assert_eq!(step, "download chunk 3"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
        assert_eq!(std::fs::read(temp_path_for(&dest)).unwrap(), b"abcdefgh");
    }

    #[tokio::test]
    async fn unquoted_payload_is_payload_error() {
        let dir = tempfile::tempdir().unwrap();
        let (meta, mut store) = stored(b"abcd", 4);
        store.payloads.insert("h1".into(), b"YWJjZA==".to_vec());

        let err = DownloadExecutor::new(&store, config())
            .execute(&meta, &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Payload { index: 1, .. }));
    }

    #[tokio::test]
    async fn tampered_chunk_is_integrity_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let (meta, mut store) = stored(b"abcdefgh", 4);
        store.payloads.insert("h2".into(), encode_chunk_payload(b"efgX"));

        let err = DownloadExecutor::new(&store, config())
            .execute(&meta, &dest)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transfer(TransferError::ChunkIntegrity { index: 2, .. })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn existing_destination_untouched_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        std::fs::write(&dest, b"old contents").unwrap();
        let (mut meta, store) = stored(b"abcdefgh", 4);
        meta.whole_file_digest = "0".repeat(32);

        let err = DownloadExecutor::new(&store, config())
            .execute(&meta, &dest)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transfer(TransferError::DigestMismatch { .. })
        ));
        assert_eq!(std::fs::read(&dest).unwrap(), b"old contents");
    }

    #[tokio::test]
    async fn cancelled_download_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (meta, store) = stored(b"abcdefgh", 4);
        let exec = DownloadExecutor::new(&store, config());
        exec.cancel_token().cancel();

        let err = exec
            .execute(&meta, &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert!(store.fetched().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_permission_bits_use_config_default() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let (mut meta, store) = stored(b"abcd", 4);
        meta.posix_permission_bits = 0;
        let config = ClientConfig {
            default_permissions: 0o640,
            ..config()
        };

        DownloadExecutor::new(&store, config)
            .execute(&meta, &dest)
            .await
            .unwrap();
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[tokio::test]
    async fn in_flight_fetches_are_bounded() {
        use crate::memory::MemoryTransport;
        use crate::types::UploadTarget;
        use crate::upload::UploadOrchestrator;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dest.bin");
        let data: Vec<u8> = (0..96u8).collect();
        std::fs::write(&src, &data).unwrap();

        let transport = MemoryTransport::new();
        let serial = ClientConfig {
            max_in_flight: 1,
            ..config()
        };
        let committed = UploadOrchestrator::new(&transport, serial)
            .upload(&src, UploadTarget::Create { dir_id: 1 })
            .await
            .unwrap();
        assert_eq!(committed.chunks.len(), 24);
        assert_eq!(transport.peak_in_flight(), 1);

        let parallel = ClientConfig {
            max_in_flight: 2,
            ..config()
        };
        DownloadExecutor::new(&transport, parallel)
            .execute(&committed, &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(transport.peak_in_flight() <= 2);
    }

    #[tokio::test]
    async fn drained_single_slot_channel_does_not_stall() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let data: Vec<u8> = (0..40u8).collect();
        let (meta, store) = stored(&data, 4);
        let (tx, mut rx) = mpsc::channel(1);
        let drain = tokio::spawn(async move {
            let mut seen = 0usize;
            while rx.recv().await.is_some() {
                seen += 1;
            }
            seen
        });

        DownloadExecutor::new(&store, config())
            .with_events(tx)
            .execute(&meta, &dest)
            .await
            .unwrap();
        // One event per chunk plus the completion event.
        assert_eq!(drain.await.unwrap(), meta.chunks.len() + 1);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }
}
