//! Upload and download flows for chunked file transfers.
//!
//! [`UploadOrchestrator`] takes a local file through
//! prepare, register, chunk upload and commit. [`DownloadExecutor`] fetches
//! the chunks of committed metadata and reassembles the file. Both talk to
//! the remote side only through the [`Transport`] trait.

pub mod config;
pub mod download;
pub mod error;
pub mod memory;
pub mod transport;
pub mod types;
pub mod upload;

pub use config::{ClientConfig, DEFAULT_MAX_IN_FLIGHT};
pub use download::DownloadExecutor;
pub use error::{ClientError, ConfigError};
pub use memory::MemoryTransport;
pub use transport::{Transport, TransportError, TransportFuture};
pub use types::{TransferEvent, UploadState, UploadTarget};
pub use upload::UploadOrchestrator;
