use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VidvaultError, VidvaultResult};
use crate::types::{CipherAlgorithm, DigestAlgorithm};

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VidvaultConfig {
    pub cipher: CipherConfig,
    pub integrity: IntegrityConfig,
    pub files: FilesConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// Default algorithm when none is given on the command line
    pub algorithm: CipherAlgorithm,
    /// Streaming chunk size in KiB (default: 64)
    pub chunk_size_kib: usize,
}

/// Largest accepted `cipher.chunk_size_kib` (64 MiB chunks)
pub const MAX_CHUNK_SIZE_KIB: usize = 64 * 1024;

impl CipherConfig {
    /// Chunk size in bytes
    pub fn chunk_size(&self) -> VidvaultResult<usize> {
        self.chunk_size_kib.checked_mul(1024).ok_or_else(|| {
            VidvaultError::Config(format!(
                "cipher.chunk_size_kib = {} overflows",
                self.chunk_size_kib
            ))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Digest used to fingerprint plaintext (default: sha256)
    pub algorithm: DigestAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Accepted input extensions, lowercase; empty accepts everything
    pub allowed_extensions: Vec<String>,
    /// Largest accepted input in MB (0 = unlimited)
    pub max_input_mb: u64,
    /// Directory for encrypted and decrypted artifacts
    pub output_dir: PathBuf,
    /// Extension appended to encrypted artifacts
    pub encrypted_suffix: String,
    /// Prefix prepended to decrypted output names
    pub decrypted_prefix: String,
}

impl FilesConfig {
    pub fn max_input_bytes(&self) -> VidvaultResult<u64> {
        self.max_input_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            VidvaultError::Config(format!(
                "files.max_input_mb = {} overflows",
                self.max_input_mb
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            algorithm: CipherAlgorithm::Aes,
            chunk_size_kib: 64,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: ["mp4", "mov", "avi", "mkv", "wmv"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_input_mb: 500,
            output_dir: PathBuf::from("."),
            encrypted_suffix: "enc".into(),
            decrypted_prefix: "decrypted_".into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl VidvaultConfig {
    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> VidvaultResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| VidvaultError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| VidvaultError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> VidvaultResult<()> {
        if self.cipher.chunk_size_kib == 0 {
            return Err(VidvaultError::Config(
                "cipher.chunk_size_kib must be greater than zero".into(),
            ));
        }
        if self.cipher.chunk_size_kib > MAX_CHUNK_SIZE_KIB {
            return Err(VidvaultError::Config(format!(
                "cipher.chunk_size_kib = {} exceeds the maximum of {MAX_CHUNK_SIZE_KIB}",
                self.cipher.chunk_size_kib
            )));
        }
        self.files.max_input_bytes()?;
        if self.files.encrypted_suffix.is_empty() {
            return Err(VidvaultError::Config(
                "files.encrypted_suffix must not be empty".into(),
            ));
        }
        Ok(())
    }
}
