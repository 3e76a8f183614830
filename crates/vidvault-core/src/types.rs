use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VidvaultError;

/// Block cipher used in CBC mode for a file transform
///
/// Serialized as its lowercase name; deserialization accepts the same
/// spellings as [`FromStr`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CipherAlgorithm {
    /// AES-256 (16-byte blocks, 32-byte key)
    #[default]
    Aes,
    /// Blowfish (8-byte blocks, 16-byte key)
    Blowfish,
}

impl CipherAlgorithm {
    pub const ALL: [CipherAlgorithm; 2] = [CipherAlgorithm::Aes, CipherAlgorithm::Blowfish];

    /// Cipher block size in bytes; also the IV length
    pub fn block_size(self) -> usize {
        match self {
            Self::Aes => 16,
            Self::Blowfish => 8,
        }
    }

    /// Required key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes => 32,
            Self::Blowfish => 16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes => "aes",
            Self::Blowfish => "blowfish",
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = VidvaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes" | "aes-256" | "aes256" => Ok(Self::Aes),
            "blowfish" | "bf" => Ok(Self::Blowfish),
            _ => Err(VidvaultError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for CipherAlgorithm {
    type Error = VidvaultError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CipherAlgorithm> for String {
    fn from(alg: CipherAlgorithm) -> Self {
        alg.as_str().to_string()
    }
}

/// Hash used for whole-file content digests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    /// Digest length in bytes (both produce 256-bit output)
    pub fn output_len(self) -> usize {
        32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = VidvaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            _ => Err(VidvaultError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for DigestAlgorithm {
    type Error = VidvaultError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DigestAlgorithm> for String {
    fn from(alg: DigestAlgorithm) -> Self {
        alg.as_str().to_string()
    }
}
