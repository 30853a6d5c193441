//! Wire payloads and integrity digests.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Encoding applied to a chunk before it is handed to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// Raw bytes.
    Identity,
    /// Gzip-compressed bytes.
    Gzip,
}

/// Bytes for one destination write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPayload {
    encoding: PayloadEncoding,
    raw_len: u64,
    data: Vec<u8>,
}

impl ChunkPayload {
    /// Wrap raw bytes without encoding.
    #[must_use]
    pub fn identity(data: Vec<u8>) -> Self {
        Self {
            encoding: PayloadEncoding::Identity,
            raw_len: data.len() as u64,
            data,
        }
    }

    /// Gzip-encode raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the encoder fails.
    pub fn gzip(raw: &[u8]) -> io::Result<Self> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::fast());
        encoder.write_all(raw)?;
        let data = encoder.finish()?;
        Ok(Self {
            encoding: PayloadEncoding::Gzip,
            raw_len: raw.len() as u64,
            data,
        })
    }

    /// Encoding of the payload.
    #[must_use]
    pub const fn encoding(&self) -> PayloadEncoding {
        self.encoding
    }

    /// Length once decoded.
    #[must_use]
    pub const fn raw_len(&self) -> u64 {
        self.raw_len
    }

    /// Length on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Decode into raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` when the decoded length disagrees with
    /// [`raw_len`](Self::raw_len) or the gzip stream is corrupt.
    pub fn into_raw(self) -> io::Result<Vec<u8>> {
        let raw = match self.encoding {
            PayloadEncoding::Identity => self.data,
            PayloadEncoding::Gzip => {
                let capacity = usize::try_from(self.raw_len).unwrap_or_default();
                let mut raw = Vec::with_capacity(capacity);
                GzDecoder::new(self.data.as_slice()).read_to_end(&mut raw)?;
                raw
            }
        };
        if raw.len() as u64 != self.raw_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "decoded payload length mismatch",
            ));
        }
        Ok(raw)
    }
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Incremental SHA-256 used while streaming.
#[derive(Debug, Clone, Default)]
pub struct IntegrityHasher {
    hasher: Sha256,
}

impl IntegrityHasher {
    /// Fresh hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Lowercase hex digest of everything fed so far.
    #[must_use]
    pub fn finish_hex(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_payload_decodes_to_original() -> io::Result<()> {
        let raw = b"id,name\n1,alpha\n2,beta\n".repeat(64);
        let payload = ChunkPayload::gzip(&raw)?;
        assert_eq!(payload.encoding(), PayloadEncoding::Gzip);
        assert!(payload.encoded_len() < payload.raw_len());
        assert_eq!(payload.into_raw()?, raw);
        Ok(())
    }

    #[test]
    fn incremental_digest_matches_one_shot() {
        let mut hasher = IntegrityHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finish_hex(), sha256_hex(b"hello world"));
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
