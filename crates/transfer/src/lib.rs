//! Chunking, hashing and reassembly for chunked file transfers.
//!
//! Splits a local file into linked, digested chunks for upload and
//! rebuilds a file from downloaded chunks, verifying each one.

mod assembler;
mod digest;
mod plan;
mod reader;
mod splitter;
mod validation;

pub use assembler::{ChunkAssembler, DEFAULT_PERMISSION_BITS, temp_path_for, verify_chunk};
pub use digest::{DigestEngine, WindowDigest, checksum, digest_window, file_md5, md5_hex};
pub use plan::{ChunkRange, PrepareOptions, RemoteFile, TransferPlan, prepare_file, split_file_name};
pub use reader::{check_chunk_length, read_chunk_range};
pub use splitter::{SplitOutput, split_stream};
pub use validation::{validate_chunk_chain, validate_destination};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk of {length} bytes exceeds the maximum chunk size of {max} bytes")]
    OversizeChunk { length: u64, max: u64 },

    #[error("range offset {offset} + length {length} exceeds file size {file_size}")]
    RangeOutOfBounds {
        offset: u64,
        length: u64,
        file_size: u64,
    },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("chunk {index} failed verification: {reason}")]
    ChunkIntegrity { index: i64, reason: String },

    #[error("file digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("broken chunk chain: {0}")]
    BrokenChain(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
