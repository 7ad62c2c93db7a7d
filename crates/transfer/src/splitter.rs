use std::io::Read;

use chunkdrive_protocol::{ChunkDescriptor, NO_LINK};

use crate::TransferError;
use crate::digest::DigestEngine;

/// Result of splitting a stream into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    /// Descriptors in file order.
    pub chunks: Vec<ChunkDescriptor>,
    /// Lowercase hex MD5 of the whole stream.
    pub whole_file_digest: String,
    /// Total bytes read.
    pub total_bytes: u64,
}

/// Splits `reader` into linked chunk descriptors of at most `chunk_size`
/// bytes each.
///
/// Any read error aborts the split; no partial descriptor list is returned.
pub fn split_stream<R: Read>(reader: R, chunk_size: usize) -> Result<SplitOutput, TransferError> {
    let mut engine = DigestEngine::new(chunk_size)?;
    let mut chunks: Vec<ChunkDescriptor> = Vec::new();
    let mut total_bytes: u64 = 0;

    let whole_file_digest = engine.run(reader, |_, window| {
        let index = chunks.len() as i64 + 1;
        let previous_index = if index == 1 { NO_LINK } else { index - 1 };
        total_bytes += window.len as u64;
        chunks.push(ChunkDescriptor {
            index,
            previous_index,
            next_index: index + 1,
            size: window.len as u64,
            content_digest: window.md5,
            checksum: window.checksum,
            remote_handle: None,
        });
    })?;

    // The last window is only known once the stream ends.
    if let Some(last) = chunks.last_mut() {
        last.next_index = NO_LINK;
    }

    Ok(SplitOutput {
        chunks,
        whole_file_digest,
        total_bytes,
    })
}
