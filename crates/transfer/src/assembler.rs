use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use chunkdrive_protocol::ChunkDescriptor;
use md5::{Digest, Md5};
use tracing::debug;

use crate::TransferError;
use crate::digest::checksum;
use crate::validation::validate_destination;

/// Permission bits used when metadata carries none.
pub const DEFAULT_PERMISSION_BITS: u32 = 0o755;

const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Returns the temporary path a download of `destination` is assembled in.
pub fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Reassembles a file from its chunks in index order.
///
/// Bytes go to `<destination>.tmp`, flushed after every chunk. Only
/// [`finish`](Self::finish) moves the file into place, so the destination
/// never holds a partial file. A failed assembly leaves the temp file
/// behind for inspection.
pub struct ChunkAssembler {
    destination: PathBuf,
    temp_path: PathBuf,
    writer: BufWriter<File>,
    hasher: Md5,
    next_index: i64,
    written: u64,
    permission_bits: u32,
}

impl ChunkAssembler {
    /// Creates (or truncates) the temp file for `destination`.
    ///
    /// `permission_bits < 1` falls back to [`DEFAULT_PERMISSION_BITS`].
    pub fn create(destination: &Path, permission_bits: u32) -> Result<Self, TransferError> {
        validate_destination(destination)?;
        let permission_bits = if permission_bits < 1 {
            DEFAULT_PERMISSION_BITS
        } else {
            permission_bits & 0o7777
        };

        let temp_path = temp_path_for(destination);
        let mut options = std::fs::OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            // Keep the owner able to write until the file is finished.
            options.mode(permission_bits | 0o600);
        }
        let file = options.open(&temp_path)?;

        Ok(Self {
            destination: destination.to_path_buf(),
            temp_path,
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            hasher: Md5::new(),
            next_index: 1,
            written: 0,
            permission_bits,
        })
    }

    /// Verifies `data` against `chunk` and appends it.
    ///
    /// Chunks must arrive in index order. Size, checksum and (when present)
    /// MD5 must match the descriptor.
    pub fn append(&mut self, chunk: &ChunkDescriptor, data: &[u8]) -> Result<(), TransferError> {
        if chunk.index != self.next_index {
            return Err(TransferError::ChunkIntegrity {
                index: chunk.index,
                reason: format!("out of order, expected chunk {}", self.next_index),
            });
        }
        verify_chunk(chunk, data)?;

        self.writer.write_all(data)?;
        self.writer.flush()?;
        self.hasher.update(data);
        self.written += data.len() as u64;
        self.next_index += 1;

        debug!(
            index = chunk.index,
            size = data.len(),
            written = self.written,
            "chunk appended"
        );
        Ok(())
    }

    /// Bytes appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Path of the temp file being assembled.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Completes the assembly.
    ///
    /// Compares the running MD5 with `expected_digest` (skipped when empty),
    /// sets the modification time from `modified_at_millis` when positive,
    /// then renames the temp file onto the destination and applies the
    /// permission bits.
    pub fn finish(
        self,
        expected_digest: &str,
        modified_at_millis: i64,
    ) -> Result<PathBuf, TransferError> {
        let actual = hex::encode(self.hasher.finalize());
        if !expected_digest.is_empty() && !actual.eq_ignore_ascii_case(expected_digest) {
            return Err(TransferError::DigestMismatch {
                expected: expected_digest.to_string(),
                actual,
            });
        }

        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        if modified_at_millis > 0 {
            let secs = (modified_at_millis / 1000) as u64;
            file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))?;
        }
        drop(file);

        std::fs::rename(&self.temp_path, &self.destination)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &self.destination,
                std::fs::Permissions::from_mode(self.permission_bits),
            )?;
        }
        #[cfg(not(unix))]
        let _ = self.permission_bits;

        debug!(
            path = %self.destination.display(),
            bytes = self.written,
            "download assembled"
        );
        Ok(self.destination)
    }
}

/// Checks decoded chunk bytes against their descriptor.
pub fn verify_chunk(chunk: &ChunkDescriptor, data: &[u8]) -> Result<(), TransferError> {
    if data.len() as u64 != chunk.size {
        return Err(TransferError::ChunkIntegrity {
            index: chunk.index,
            reason: format!("expected {} bytes, got {}", chunk.size, data.len()),
        });
    }
    let crc = checksum(data);
    if crc != chunk.checksum {
        return Err(TransferError::ChunkIntegrity {
            index: chunk.index,
            reason: format!("checksum {crc:08x} != {:08x}", chunk.checksum),
        });
    }
    if !chunk.content_digest.is_empty() {
        let md5 = crate::digest::md5_hex(data);
        if !md5.eq_ignore_ascii_case(&chunk.content_digest) {
            return Err(TransferError::ChunkIntegrity {
                index: chunk.index,
                reason: format!("digest {md5} != {}", chunk.content_digest),
            });
        }
    }
    Ok(())
}
