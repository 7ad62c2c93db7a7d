use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::TransferError;

/// Reads `length` bytes at `offset` from the file at `path`.
///
/// `length` is checked against `max_chunk_size` before the file is
/// opened, so an oversize request never reaches the filesystem or the
/// network. A range past the end of the file is rejected rather than
/// short-read.
pub fn read_chunk_range(
    path: &Path,
    offset: u64,
    length: u64,
    max_chunk_size: usize,
) -> Result<Vec<u8>, TransferError> {
    check_chunk_length(length, max_chunk_size)?;

    let mut file = std::fs::File::open(path)?;
    let file_size = file.metadata()?.len();
    if offset.checked_add(length).is_none_or(|end| end > file_size) {
        return Err(TransferError::RangeOutOfBounds {
            offset,
            length,
            file_size,
        });
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Rejects a chunk length above the configured maximum.
pub fn check_chunk_length(length: u64, max_chunk_size: usize) -> Result<(), TransferError> {
    if length > max_chunk_size as u64 {
        return Err(TransferError::OversizeChunk {
            length,
            max: max_chunk_size as u64,
        });
    }
    Ok(())
}
