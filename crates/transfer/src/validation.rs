use std::collections::HashMap;
use std::path::Path;

use chunkdrive_protocol::{ChunkDescriptor, NO_LINK};

use crate::TransferError;

/// Validates that `chunks` form exactly one linked sequence.
///
/// Rejects:
/// - Indices that are not `1..=len` in order
/// - A first chunk whose previous link is not the sentinel
/// - A last chunk whose next link is not the sentinel
/// - Next/previous links that skip, repeat or loop
pub fn validate_chunk_chain(chunks: &[ChunkDescriptor]) -> Result<(), TransferError> {
    for (pos, chunk) in chunks.iter().enumerate() {
        let expected = pos as i64 + 1;
        if chunk.index != expected {
            return Err(TransferError::BrokenChain(format!(
                "chunk at position {pos} has index {}, expected {expected}",
                chunk.index
            )));
        }
    }

    let Some(first) = chunks.first() else {
        return Ok(());
    };
    if first.previous_index != NO_LINK {
        return Err(TransferError::BrokenChain(format!(
            "first chunk links back to {}",
            first.previous_index
        )));
    }

    let by_index: HashMap<i64, &ChunkDescriptor> = chunks.iter().map(|c| (c.index, c)).collect();
    let mut current = first;
    let mut visited = 1usize;
    while current.next_index != NO_LINK {
        let Some(next) = by_index.get(&current.next_index) else {
            return Err(TransferError::BrokenChain(format!(
                "chunk {} links to missing chunk {}",
                current.index, current.next_index
            )));
        };
        if next.index != current.index + 1 || next.previous_index != current.index {
            return Err(TransferError::BrokenChain(format!(
                "chunk {} and chunk {} are not linked in order",
                current.index, next.index
            )));
        }
        visited += 1;
        if visited > chunks.len() {
            return Err(TransferError::BrokenChain("cycle in chunk links".into()));
        }
        current = next;
    }

    if visited != chunks.len() {
        return Err(TransferError::BrokenChain(format!(
            "chain ends at chunk {} but {} chunks exist",
            current.index,
            chunks.len()
        )));
    }
    Ok(())
}

/// Validates a download destination: it must be non-empty and name a file.
pub fn validate_destination(path: &Path) -> Result<(), TransferError> {
    if path.as_os_str().is_empty() {
        return Err(TransferError::InvalidPath("empty destination path".into()));
    }
    if path.file_name().is_none() {
        return Err(TransferError::InvalidPath(format!(
            "destination has no file name: {}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: i64, previous_index: i64, next_index: i64) -> ChunkDescriptor {
        ChunkDescriptor {
            index,
            previous_index,
            next_index,
            size: 1,
            content_digest: String::new(),
            checksum: 0,
            remote_handle: None,
        }
    }

    #[test]
    fn accepts_empty_chain() {
        assert!(validate_chunk_chain(&[]).is_ok());
    }

    #[test]
    fn accepts_single_chunk() {
        assert!(validate_chunk_chain(&[chunk(1, -1, -1)]).is_ok());
    }

    #[test]
    fn accepts_well_formed_chain() {
        let chain = [chunk(1, -1, 2), chunk(2, 1, 3), chunk(3, 2, -1)];
        assert!(validate_chunk_chain(&chain).is_ok());
    }

    #[test]
    fn rejects_first_with_back_link() {
        let chain = [chunk(1, 0, 2), chunk(2, 1, -1)];
        assert!(validate_chunk_chain(&chain).is_err());
    }

    #[test]
    fn rejects_open_tail() {
        let chain = [chunk(1, -1, 2), chunk(2, 1, 3)];
        assert!(matches!(
            validate_chunk_chain(&chain),
            Err(TransferError::BrokenChain(_))
        ));
    }

    #[test]
    fn rejects_early_termination() {
        let chain = [chunk(1, -1, -1), chunk(2, 1, -1)];
        assert!(validate_chunk_chain(&chain).is_err());
    }

    #[test]
    fn rejects_gap_in_indices() {
        let chain = [chunk(1, -1, 3), chunk(3, 1, -1)];
        assert!(validate_chunk_chain(&chain).is_err());
    }

    #[test]
    fn rejects_cycle() {
        let chain = [chunk(1, -1, 2), chunk(2, 1, 1)];
        assert!(validate_chunk_chain(&chain).is_err());
    }

    #[test]
    fn rejects_empty_destination() {
        assert!(matches!(
            validate_destination(Path::new("")),
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[test]
    fn rejects_destination_without_file_name() {
        assert!(validate_destination(Path::new("/")).is_err());
        assert!(validate_destination(Path::new("out/..")).is_err());
    }

    #[test]
    fn accepts_file_destination() {
        assert!(validate_destination(Path::new("out/report.pdf")).is_ok());
    }
}
