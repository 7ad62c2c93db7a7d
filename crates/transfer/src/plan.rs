//! Transfer plan preparation: stat + split a local file into metadata.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chunkdrive_protocol::{ChunkDescriptor, FileTransferMetadata};
use tracing::debug;

use crate::TransferError;
use crate::splitter::split_stream;

/// An existing remote file being modified in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: i64,
    pub version: i64,
}

/// Inputs to [`prepare_file`] that do not come from the file itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
    /// Actor recorded as the author of the change.
    pub changed_by: i64,
    /// Remote parent folder.
    pub dir_id: i64,
    /// Set when modifying an existing remote file; its version is carried
    /// forward unchanged.
    pub existing: Option<RemoteFile>,
}

/// Byte range of one chunk within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: i64,
    pub offset: u64,
    pub length: u64,
}

/// A local file ready for upload: its metadata and chunk plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Local file the plan was computed from.
    pub source: PathBuf,
    /// Chunk size the plan was split with.
    pub chunk_size: usize,
    pub metadata: FileTransferMetadata,
}

impl TransferPlan {
    /// Returns every chunk with its byte range, in index order.
    pub fn ranges(&self) -> Vec<(ChunkRange, &ChunkDescriptor)> {
        let mut offset = 0u64;
        self.metadata
            .chunks
            .iter()
            .map(|chunk| {
                let range = ChunkRange {
                    index: chunk.index,
                    offset,
                    length: chunk.size,
                };
                offset += chunk.size;
                (range, chunk)
            })
            .collect()
    }
}

/// Computes metadata and the chunk plan for the file at `path`.
///
/// Reads the file once. Any I/O failure aborts the whole step.
pub fn prepare_file(path: &Path, options: &PrepareOptions) -> Result<TransferPlan, TransferError> {
    let stat = std::fs::metadata(path)?;
    if !stat.is_file() {
        return Err(TransferError::InvalidPath(format!(
            "not a regular file: {}",
            path.display()
        )));
    }
    let (name, extension, full_name) = split_file_name(path)?;

    let file = std::fs::File::open(path)?;
    let split = split_stream(file, options.chunk_size)?;

    debug!(
        path = %path.display(),
        size = split.total_bytes,
        chunks = split.chunks.len(),
        digest = %split.whole_file_digest,
        "file split into chunks"
    );

    let metadata = FileTransferMetadata {
        id: options.existing.map(|f| f.id),
        dir_id: options.dir_id,
        name,
        extension,
        full_name,
        size_bytes: split.total_bytes,
        modified_at_millis: modified_millis(stat.modified()?),
        posix_permission_bits: permission_bits(&stat),
        whole_file_digest: split.whole_file_digest,
        chunks: split.chunks,
        version: options.existing.map(|f| f.version),
        changed_by: options.changed_by,
    };

    Ok(TransferPlan {
        source: path.to_path_buf(),
        chunk_size: options.chunk_size,
        metadata,
    })
}

/// Splits a path's base name into `(name, extension, full_name)`.
///
/// The extension is everything after the last dot, without the dot; a name
/// without one yields an empty extension. A dotfile such as `.bashrc` has an
/// empty name and extension `bashrc`.
pub fn split_file_name(path: &Path) -> Result<(String, String, String), TransferError> {
    let full_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::InvalidPath(format!("no file name: {}", path.display())))?;
    let (name, extension) = match full_name.rsplit_once('.') {
        Some((name, extension)) => (name.to_string(), extension.to_string()),
        None => (full_name.clone(), String::new()),
    };
    Ok((name, extension, full_name))
}

/// Modification time as whole seconds since the epoch, expressed in millis.
fn modified_millis(modified: SystemTime) -> i64 {
    match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64 * 1000,
        Err(e) => -(e.duration().as_secs() as i64) * 1000,
    }
}

#[cfg(unix)]
fn permission_bits(stat: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    stat.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(stat: &std::fs::Metadata) -> u32 {
    if stat.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
