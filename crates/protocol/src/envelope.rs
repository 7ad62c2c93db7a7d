//! Chunk payload envelope used by the remote download endpoint.
//!
//! The service delivers chunk bytes as a JSON string literal holding
//! standard base64: `"SGVsbG8="`. Decoding strips the surrounding quotes
//! and base64-decodes the rest. Nothing else in the workspace knows the
//! envelope format.

use base64::{Engine, engine::general_purpose::STANDARD};

/// Errors produced while decoding a chunk payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("chunk payload is not wrapped in quotes ({len} bytes)")]
    MissingQuotes { len: usize },

    #[error("invalid base64 in chunk payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

const QUOTE: u8 = b'"';

/// Decodes a quoted, base64-encoded chunk payload into raw bytes.
pub fn decode_chunk_payload(payload: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let inner = match payload {
        [QUOTE, inner @ .., QUOTE] => inner,
        _ => {
            return Err(PayloadError::MissingQuotes {
                len: payload.len(),
            });
        }
    };
    Ok(STANDARD.decode(inner)?)
}

/// Encodes raw bytes into the quoted base64 envelope.
pub fn encode_chunk_payload(data: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(data);
    let mut out = Vec::with_capacity(encoded.len() + 2);
    out.push(QUOTE);
    out.extend_from_slice(encoded.as_bytes());
    out.push(QUOTE);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_quoted_base64() {
        let data = decode_chunk_payload(b"\"SGVsbG8=\"").unwrap();
        assert_eq!(data, b"Hello");
    }

    #[test]
    fn decodes_empty_payload() {
        let data = decode_chunk_payload(b"\"\"").unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn encode_matches_wire_form() {
        assert_eq!(encode_chunk_payload(b"Hello"), b"\"SGVsbG8=\"".to_vec());
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(
            decode_chunk_payload(&encode_chunk_payload(&bytes)).unwrap(),
            bytes
        );
    }

    #[test]
    fn rejects_unquoted_payload() {
        let err = decode_chunk_payload(b"SGVsbG8=").unwrap_err();
        assert!(matches!(err, PayloadError::MissingQuotes { len: 8 }));
    }

    #[test]
    fn rejects_lone_quote() {
        assert!(matches!(
            decode_chunk_payload(b"\"").unwrap_err(),
            PayloadError::MissingQuotes { len: 1 }
        ));
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode_chunk_payload(b"\"not base64!\"").unwrap_err();
        assert!(matches!(err, PayloadError::Base64(_)));
    }
}
