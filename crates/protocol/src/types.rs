use serde::{Deserialize, Serialize};

/// Link value marking the start or end of a chunk chain.
pub const NO_LINK: i64 = -1;

/// One chunk of a file.
///
/// Descriptors are computed once from a local file and never mutated;
/// remote handles are recorded on a fresh copy of the owning metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    /// 1-based position in the file.
    pub index: i64,
    /// Index of the preceding chunk, or [`NO_LINK`] for the first chunk.
    pub previous_index: i64,
    /// Index of the following chunk, or [`NO_LINK`] for the last chunk.
    pub next_index: i64,
    /// Byte length of this chunk.
    pub size: u64,
    /// Lowercase hex MD5 of the chunk bytes.
    pub content_digest: String,
    /// CRC-32 of the chunk bytes.
    pub checksum: u32,
    /// Identifier assigned by the remote side once the chunk is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_handle: Option<String>,
}

impl ChunkDescriptor {
    /// Returns `true` for the first chunk of a chain.
    pub fn is_first(&self) -> bool {
        self.previous_index == NO_LINK
    }

    /// Returns `true` for the last chunk of a chain.
    pub fn is_last(&self) -> bool {
        self.next_index == NO_LINK
    }
}

/// Describes a file and its chunk plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferMetadata {
    /// Remote file id (absent when creating a new file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Remote parent folder id.
    pub dir_id: i64,
    /// Base name without the extension.
    pub name: String,
    /// Extension without the leading dot (empty if none).
    #[serde(default)]
    pub extension: String,
    /// Base name including the extension.
    pub full_name: String,
    pub size_bytes: u64,
    pub modified_at_millis: i64,
    pub posix_permission_bits: u32,
    /// Lowercase hex MD5 of the whole file.
    pub whole_file_digest: String,
    #[serde(default)]
    pub chunks: Vec<ChunkDescriptor>,
    /// Optimistic-concurrency token (absent on create).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Actor recorded as the author of this change.
    #[serde(default)]
    pub changed_by: i64,
}

impl FileTransferMetadata {
    /// Returns a copy whose chunks carry the given remote handles.
    ///
    /// `handles` is matched against chunks by position; chunks without a
    /// counterpart keep their current handle.
    pub fn with_remote_handles<I, S>(&self, handles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut copy = self.clone();
        for (chunk, handle) in copy.chunks.iter_mut().zip(handles) {
            chunk.remote_handle = Some(handle.into());
        }
        copy
    }

    /// Returns the chunk with the given 1-based index.
    pub fn chunk(&self, index: i64) -> Option<&ChunkDescriptor> {
        self.chunks.iter().find(|c| c.index == index)
    }
}
