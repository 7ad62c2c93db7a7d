use std::io::{ErrorKind, Read};
use std::path::Path;

use md5::{Digest, Md5};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Digest helpers
// ---------------------------------------------------------------------------

/// Computes MD5 of `data` and returns the lowercase hex digest.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Computes the CRC-32 checksum of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Digest and checksum of one window of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDigest {
    /// Number of bytes the window actually held.
    pub len: usize,
    /// Lowercase hex MD5.
    pub md5: String,
    /// CRC-32.
    pub checksum: u32,
}

/// Digests a single window of bytes.
pub fn digest_window(data: &[u8]) -> WindowDigest {
    WindowDigest {
        len: data.len(),
        md5: md5_hex(data),
        checksum: checksum(data),
    }
}

/// Computes MD5 of an entire file and returns the hex digest.
pub fn file_md5(path: &Path) -> Result<String, TransferError> {
    let file = std::fs::File::open(path)?;
    let mut engine = DigestEngine::new(64 * 1024)?;
    Ok(engine.run(file, |_, _| {})?)
}

// ---------------------------------------------------------------------------
// DigestEngine
// ---------------------------------------------------------------------------

/// Streams a reader in fixed-size windows, digesting each window and the
/// whole stream in a single pass.
///
/// Only one window is buffered at a time.
pub struct DigestEngine {
    buf: Vec<u8>,
}

impl DigestEngine {
    /// Creates an engine reading windows of `window_size` bytes.
    pub fn new(window_size: usize) -> Result<Self, TransferError> {
        if window_size == 0 {
            return Err(TransferError::InvalidChunkSize(window_size));
        }
        Ok(Self {
            buf: vec![0u8; window_size],
        })
    }

    /// Window size in bytes.
    pub fn window_size(&self) -> usize {
        self.buf.len()
    }

    /// Reads `reader` to the end.
    ///
    /// `visit` is called once per window, in stream order, with the
    /// window's bytes and their digest. The last window may be short; it
    /// is digested over the bytes read, never padded. Returns the hex MD5
    /// of the whole stream.
    pub fn run<R, F>(&mut self, mut reader: R, mut visit: F) -> std::io::Result<String>
    where
        R: Read,
        F: FnMut(&[u8], WindowDigest),
    {
        let mut whole = Md5::new();
        loop {
            let n = fill_window(&mut reader, &mut self.buf)?;
            if n == 0 {
                break;
            }
            let window = &self.buf[..n];
            whole.update(window);
            visit(window, digest_window(window));
            if n < self.buf.len() {
                break;
            }
        }
        Ok(hex::encode(whole.finalize()))
    }
}

/// Reads until `buf` is full or the reader hits EOF.
fn fill_window<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
