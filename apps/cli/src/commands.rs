//! Subcommand implementations.

use std::path::Path;

use anyhow::{Context, bail};
use chunkdrive_client::{
    ClientConfig, DownloadExecutor, MemoryTransport, TransferEvent, UploadOrchestrator,
    UploadTarget,
};
use chunkdrive_protocol::FileTransferMetadata;
use chunkdrive_transfer::{
    PrepareOptions, TransferPlan, file_md5, prepare_file, read_chunk_range, validate_chunk_chain,
    verify_chunk,
};
use tokio::sync::mpsc;
use tracing::info;

/// Loads the client config (defaults when no file is given) and applies
/// command-line overrides.
pub fn load_config(path: Option<&Path>, chunk_size: Option<usize>) -> anyhow::Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(size) = chunk_size {
        config.chunk_size = size;
    }
    config.validate()?;
    Ok(config)
}

pub fn run_plan(config: &ClientConfig, file: &Path, dir_id: i64) -> anyhow::Result<()> {
    let options = PrepareOptions {
        chunk_size: config.chunk_size,
        changed_by: config.actor_id,
        dir_id,
        existing: None,
    };
    let plan = prepare_file(file, &options)
        .with_context(|| format!("failed to plan {}", file.display()))?;
    info!(
        file = %plan.metadata.full_name,
        size = plan.metadata.size_bytes,
        chunks = plan.metadata.chunks.len(),
        "plan ready"
    );
    println!("{}", serde_json::to_string_pretty(&plan.metadata)?);
    Ok(())
}

pub fn run_verify(file: &Path, metadata_path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(metadata_path)
        .with_context(|| format!("failed to read {}", metadata_path.display()))?;
    let metadata: FileTransferMetadata = serde_json::from_str(&text)
        .with_context(|| format!("invalid metadata in {}", metadata_path.display()))?;

    verify_file(file, &metadata)?;
    println!(
        "{}: {} bytes in {} chunks verified",
        file.display(),
        metadata.size_bytes,
        metadata.chunks.len()
    );
    Ok(())
}

/// Checks `file` chunk by chunk against `metadata`.
pub fn verify_file(file: &Path, metadata: &FileTransferMetadata) -> anyhow::Result<()> {
    validate_chunk_chain(&metadata.chunks)?;

    let size = std::fs::metadata(file)
        .with_context(|| format!("failed to stat {}", file.display()))?
        .len();
    if size != metadata.size_bytes {
        bail!(
            "size mismatch: file has {size} bytes, metadata says {}",
            metadata.size_bytes
        );
    }

    let max_chunk = metadata.chunks.iter().map(|c| c.size).max().unwrap_or(0);
    let plan = TransferPlan {
        source: file.to_path_buf(),
        chunk_size: usize::try_from(max_chunk)?,
        metadata: metadata.clone(),
    };
    for (range, chunk) in plan.ranges() {
        let data = read_chunk_range(file, range.offset, range.length, plan.chunk_size)?;
        verify_chunk(chunk, &data)?;
    }

    let digest = file_md5(file)?;
    if !digest.eq_ignore_ascii_case(&metadata.whole_file_digest) {
        bail!(
            "digest mismatch: file is {digest}, metadata says {}",
            metadata.whole_file_digest
        );
    }
    Ok(())
}

/// Uploads `file` to an in-memory store, then downloads it to `output`.
pub async fn run_loopback(config: ClientConfig, file: &Path, output: &Path) -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let (tx, mut rx) = mpsc::channel::<TransferEvent>(64);
    let logger = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::debug!(?event, "transfer event");
        }
    });

    let committed = UploadOrchestrator::new(&transport, config.clone())
        .with_events(tx.clone())
        .upload(file, UploadTarget::Create { dir_id: 0 })
        .await?;
    let path = DownloadExecutor::new(&transport, config)
        .with_events(tx)
        .execute(&committed, output)
        .await?;
    let _ = logger.await;

    println!(
        "{} -> {} ({} bytes, {} chunks, md5 {})",
        file.display(),
        path.display(),
        committed.size_bytes,
        committed.chunks.len(),
        committed.whole_file_digest
    );
    Ok(())
}
