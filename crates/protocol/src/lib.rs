//! Data model and transport payloads for chunked file transfers.
//!
//! Every type here is a plain value object; the transfer and client
//! crates compute, send and receive them.

pub mod envelope;
pub mod messages;
pub mod types;

pub use envelope::{PayloadError, decode_chunk_payload, encode_chunk_payload};
pub use messages::{Ack, ChunkUpload, CommitRequest, RegisterMode, RegisterRequest, Registration};
pub use types::{ChunkDescriptor, FileTransferMetadata, NO_LINK};
