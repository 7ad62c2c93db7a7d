use serde::{Deserialize, Serialize};

use crate::types::FileTransferMetadata;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Whether a registration creates a new remote file or modifies one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterMode {
    Create,
    Modify,
}

/// Registers file metadata and its chunk plan with the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub mode: RegisterMode,
    pub metadata: FileTransferMetadata,
}

/// Uploads the bytes of a single chunk.
///
/// The `data` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUpload {
    pub file_id: i64,
    pub chunk_index: i64,
    pub offset: u64,
    pub length: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Finalizes an uploaded file at the given version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub file_id: i64,
    pub version: i64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Identity assigned by the remote side to registered metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub file_id: i64,
    pub version: i64,
}

/// Acknowledgement returned by every remote call.
///
/// `suc == false` is a rejection; `result_code` then carries the
/// remote error code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack<T> {
    pub suc: bool,
    #[serde(default)]
    pub result_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T> Ack<T> {
    /// A successful acknowledgement carrying `payload`.
    pub fn accepted(payload: T) -> Self {
        Self {
            suc: true,
            result_code: 0,
            payload: Some(payload),
        }
    }

    /// A rejection with the remote error code.
    pub fn rejected(result_code: i64) -> Self {
        Self {
            suc: false,
            result_code,
            payload: None,
        }
    }

    /// Splits the ack into its payload or the remote error code.
    pub fn into_result(self) -> Result<Option<T>, i64> {
        if self.suc {
            Ok(self.payload)
        } else {
            Err(self.result_code)
        }
    }
}

/// Custom base64 serde module for raw chunk bytes.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
