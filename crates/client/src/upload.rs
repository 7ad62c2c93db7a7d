//! Upload orchestrator: prepare, register, push chunks, commit.

use std::path::{Path, PathBuf};

use chunkdrive_protocol::{
    ChunkDescriptor, ChunkUpload, CommitRequest, FileTransferMetadata, RegisterMode,
    RegisterRequest, Registration,
};
use chunkdrive_transfer::{
    ChunkRange, PrepareOptions, TransferPlan, check_chunk_length, prepare_file, read_chunk_range,
    verify_chunk,
};
use futures_util::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::{Transport, TransportError};
use crate::types::{TransferEvent, UploadState, UploadTarget};

/// Drives one file at a time through
/// `Prepared -> MetadataRegistered -> ChunksUploaded -> Committed`.
pub struct UploadOrchestrator<'a> {
    transport: &'a dyn Transport,
    config: ClientConfig,
    cancel: CancellationToken,
    events_tx: Option<mpsc::Sender<TransferEvent>>,
}

impl<'a> UploadOrchestrator<'a> {
    /// Creates an orchestrator over `transport`.
    pub fn new(transport: &'a dyn Transport, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
            events_tx: None,
        }
    }

    /// Sends progress events to `events_tx`.
    ///
    /// Events are sent with backpressure: the receiver must be drained, or
    /// the upload stalls once the channel is full.
    pub fn with_events(mut self, events_tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    /// Uses `cancel` instead of a private token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a cancellation token for uploads run by this orchestrator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Computes metadata and the chunk plan for `path` (the `Prepared` state).
    ///
    /// Synchronous: reads the whole file once.
    pub fn prepare(&self, path: &Path, target: UploadTarget) -> Result<TransferPlan, ClientError> {
        let options = self.prepare_options(target);
        Ok(prepare_file(path, &options)?)
    }

    /// Prepares `path` and runs the full upload.
    pub async fn upload(
        &self,
        path: &Path,
        target: UploadTarget,
    ) -> Result<FileTransferMetadata, ClientError> {
        self.check_cancelled()?;
        let options = self.prepare_options(target);
        let plan = tokio::task::spawn_blocking({
            let path = path.to_path_buf();
            move || prepare_file(&path, &options)
        })
        .await
        .map_err(|e| ClientError::Task(format!("task join error: {e}")))??;

        self.execute(&plan).await
    }

    /// Runs a prepared plan to the `Committed` state.
    ///
    /// Returns the metadata reported by the remote side on commit.
    pub async fn execute(&self, plan: &TransferPlan) -> Result<FileTransferMetadata, ClientError> {
        let file = plan.metadata.full_name.clone();
        match self.run(plan).await {
            Ok(committed) => {
                self.emit(TransferEvent::Completed { file: file.clone() })
                    .await;
                info!(
                    file = %file,
                    id = ?committed.id,
                    version = ?committed.version,
                    "upload committed"
                );
                Ok(committed)
            }
            Err(e) => {
                self.emit(TransferEvent::Failed {
                    file: file.clone(),
                    error: e.to_string(),
                })
                .await;
                error!(file = %file, error = %e, "upload failed");
                Err(e)
            }
        }
    }

    /// Uploads a single byte range of `path` as chunk `chunk_index`.
    ///
    /// A range longer than the configured chunk size is rejected before
    /// the file is read or the transport is called.
    pub async fn upload_chunk_range(
        &self,
        file_id: i64,
        chunk_index: i64,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> Result<(), ClientError> {
        check_chunk_length(length, self.config.chunk_size)?;
        self.check_cancelled()?;
        let data = read_range(path.to_path_buf(), offset, length, self.config.chunk_size).await?;
        self.send_chunk(file_id, chunk_index, offset, data, &path.display().to_string())
            .await
    }

    async fn run(&self, plan: &TransferPlan) -> Result<FileTransferMetadata, ClientError> {
        let file = &plan.metadata.full_name;
        // Plans are plain data; hold them to this orchestrator's limit.
        for chunk in &plan.metadata.chunks {
            check_chunk_length(chunk.size, self.config.chunk_size)?;
        }
        self.check_cancelled()?;
        self.stage(file, UploadState::Prepared).await;

        let registration = self.register(plan).await?;
        self.stage(file, UploadState::MetadataRegistered).await;

        self.upload_chunks(plan, registration.file_id).await?;
        self.stage(file, UploadState::ChunksUploaded).await;

        self.check_cancelled()?;
        let committed = self
            .commit(registration.file_id, registration.version)
            .await?;
        self.stage(file, UploadState::Committed).await;

        Ok(committed)
    }

    /// Registers the plan's metadata (create or modify).
    async fn register(&self, plan: &TransferPlan) -> Result<Registration, ClientError> {
        let meta = &plan.metadata;
        let mode = if meta.id.is_some() {
            RegisterMode::Modify
        } else {
            RegisterMode::Create
        };
        let request = RegisterRequest {
            mode,
            metadata: meta.clone(),
        };

        let ack = match self.transport.register_metadata(&request).await {
            Ok(ack) => ack,
            Err(TransportError::VersionConflict { current }) => {
                let version = meta.version.unwrap_or_default();
                warn!(file = %meta.full_name, version, ?current, "modify rejected: stale version");
                return Err(ClientError::VersionConflict {
                    file_id: meta.id.unwrap_or_default(),
                    version,
                });
            }
            Err(source) => {
                return Err(ClientError::Transport {
                    step: "register metadata".into(),
                    source,
                });
            }
        };

        let registration = ack
            .into_result()
            .map_err(|code| ClientError::Remote {
                code,
                context: register_context(mode, meta, &plan.source),
            })?
            .ok_or_else(|| ClientError::Transport {
                step: "register metadata".into(),
                source: TransportError::Failed("empty registration response".into()),
            })?;

        debug!(
            file = %meta.full_name,
            file_id = registration.file_id,
            version = registration.version,
            "metadata registered"
        );
        Ok(registration)
    }

    /// Pushes every planned chunk, at most `max_in_flight` at a time.
    async fn upload_chunks(&self, plan: &TransferPlan, file_id: i64) -> Result<(), ClientError> {
        let max_in_flight = self.config.max_in_flight.max(1);
        let mut uploads = stream::iter(plan.ranges())
            .map(|(range, chunk)| self.upload_planned_chunk(plan, file_id, range, chunk))
            .buffer_unordered(max_in_flight);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
                next = uploads.next() => next,
            };
            match next {
                Some(result) => result?,
                None => return Ok(()),
            }
        }
    }

    async fn upload_planned_chunk(
        &self,
        plan: &TransferPlan,
        file_id: i64,
        range: ChunkRange,
        chunk: &ChunkDescriptor,
    ) -> Result<(), ClientError> {
        self.check_cancelled()?;
        let data =
            read_range(plan.source.clone(), range.offset, range.length, self.config.chunk_size)
                .await?;
        // The file may have changed since the plan was computed.
        verify_chunk(chunk, &data)?;
        self.send_chunk(
            file_id,
            range.index,
            range.offset,
            data,
            &plan.metadata.full_name,
        )
        .await
    }

    async fn send_chunk(
        &self,
        file_id: i64,
        chunk_index: i64,
        offset: u64,
        data: Vec<u8>,
        file: &str,
    ) -> Result<(), ClientError> {
        let length = data.len() as u64;
        let upload = ChunkUpload {
            file_id,
            chunk_index,
            offset,
            length,
            data,
        };
        let ack = self
            .transport
            .upload_chunk_bytes(upload)
            .await
            .map_err(|source| ClientError::Transport {
                step: format!("upload chunk {chunk_index}"),
                source,
            })?;
        ack.into_result().map_err(|code| ClientError::Remote {
            code,
            context: format!("failed to upload chunk {chunk_index} of file {file_id}"),
        })?;

        debug!(file_id, index = chunk_index, offset, size = length, "chunk uploaded");
        self.emit(TransferEvent::ChunkUploaded {
            file: file.to_string(),
            index: chunk_index,
            bytes: length,
        })
        .await;
        Ok(())
    }

    /// Finalizes the upload at `version`.
    async fn commit(&self, file_id: i64, version: i64) -> Result<FileTransferMetadata, ClientError> {
        let request = CommitRequest { file_id, version };
        let ack = match self.transport.commit(&request).await {
            Ok(ack) => ack,
            Err(TransportError::VersionConflict { current }) => {
                warn!(file_id, version, ?current, "commit rejected: stale version");
                return Err(ClientError::VersionConflict { file_id, version });
            }
            Err(source) => {
                return Err(ClientError::Transport {
                    step: "commit".into(),
                    source,
                });
            }
        };

        ack.into_result()
            .map_err(|code| ClientError::Remote {
                code,
                context: format!("failed to commit upload: {file_id} {version}"),
            })?
            .ok_or_else(|| ClientError::Transport {
                step: "commit".into(),
                source: TransportError::Failed("empty commit response".into()),
            })
    }

    fn prepare_options(&self, target: UploadTarget) -> PrepareOptions {
        PrepareOptions {
            chunk_size: self.config.chunk_size,
            changed_by: self.config.actor_id,
            dir_id: target.dir_id(),
            existing: target.existing(),
        }
    }

    fn check_cancelled(&self) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn stage(&self, file: &str, state: UploadState) {
        debug!(file = %file, ?state, "upload state");
        self.emit(TransferEvent::Stage {
            file: file.to_string(),
            state,
        })
        .await;
    }

    async fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event).await;
        }
    }
}

async fn read_range(
    path: PathBuf,
    offset: u64,
    length: u64,
    max_chunk_size: usize,
) -> Result<Vec<u8>, ClientError> {
    let data =
        tokio::task::spawn_blocking(move || read_chunk_range(&path, offset, length, max_chunk_size))
            .await
            .map_err(|e| ClientError::Task(format!("task join error: {e}")))??;
    Ok(data)
}

fn register_context(mode: RegisterMode, meta: &FileTransferMetadata, source: &Path) -> String {
    match mode {
        RegisterMode::Create => format!(
            "failed to create file: {} {}",
            meta.dir_id,
            source.display()
        ),
        RegisterMode::Modify => format!(
            "failed to modify file: {} {} {}",
            meta.id.unwrap_or_default(),
            meta.dir_id,
            source.display()
        ),
    }
}
