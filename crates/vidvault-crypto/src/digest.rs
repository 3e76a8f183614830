//! Whole-file content digests (SHA-256 or BLAKE3)
//!
//! Used to fingerprint plaintext before encryption and to check the
//! recovered plaintext after decryption. A digest comparison is a
//! probabilistic signal, not authentication.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use vidvault_core::{DigestAlgorithm, VidvaultError, VidvaultResult};

use crate::stream::read_chunk;

/// Read buffer for hashing (64 KiB)
const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// A content digest, stored as lowercase hex alongside the hash that made it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl ContentDigest {
    /// Parse a hex digest; accepts either case, stores lowercase.
    pub fn from_hex(algorithm: DigestAlgorithm, hex: &str) -> VidvaultResult<Self> {
        let hex = hex.trim();
        let expected = algorithm.output_len() * 2;
        if hex.len() != expected || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VidvaultError::Other(anyhow::anyhow!(
                "invalid {algorithm} digest '{hex}': expected {expected} hex chars"
            )));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn to_hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

enum Hasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> ContentDigest {
        match self {
            Self::Sha256(h) => ContentDigest {
                algorithm: DigestAlgorithm::Sha256,
                hex: format!("{:x}", h.finalize()),
            },
            Self::Blake3(h) => ContentDigest {
                algorithm: DigestAlgorithm::Blake3,
                hex: h.finalize().to_hex().to_string(),
            },
        }
    }
}

/// Hash everything `reader` yields, 64 KiB at a time.
pub fn digest_stream<R: Read>(
    mut reader: R,
    algorithm: DigestAlgorithm,
) -> VidvaultResult<ContentDigest> {
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; DIGEST_CHUNK_SIZE];

    loop {
        let n = read_chunk(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

/// Hash a file from disk without reading it fully into memory.
pub fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> VidvaultResult<ContentDigest> {
    let file = std::fs::File::open(path)?;
    let digest = digest_stream(file, algorithm)?;
    tracing::debug!(path = %path.display(), %algorithm, digest = %digest, "hashed file");
    Ok(digest)
}

/// Compare two digests; a mismatch means wrong password or corrupted file.
pub fn verify_digest(expected: &ContentDigest, actual: &ContentDigest) -> VidvaultResult<()> {
    if expected.algorithm != actual.algorithm || expected.hex != actual.hex {
        return Err(VidvaultError::IntegrityMismatch {
            expected: format!("{}:{}", expected.algorithm, expected.hex),
            actual: format!("{}:{}", actual.algorithm, actual.hex),
        });
    }
    Ok(())
}

/// Writer adapter that hashes every byte passed through to the inner writer.
///
/// Lets a decrypt pass fingerprint its output without re-reading it.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner,
            hasher: Hasher::new(algorithm),
        }
    }

    /// Flush the inner writer and return it with the digest of all bytes written.
    pub fn finish(mut self) -> VidvaultResult<(W, ContentDigest)> {
        self.inner.flush()?;
        Ok((self.inner, self.hasher.finalize()))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
