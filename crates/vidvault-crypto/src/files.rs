//! File-level encrypt/decrypt with scoped handles and partial-output cleanup
//!
//! Every handle is owned by the call that opens it. Output is written to a
//! temporary sibling of the destination and renamed over it only once the
//! transform has completed. A failed operation removes its temporary file and
//! leaves whatever was already at the destination untouched.

use serde::{Deserialize, Serialize};
use secrecy::SecretString;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use vidvault_core::config::FilesConfig;
use vidvault_core::{CipherAlgorithm, DigestAlgorithm, VidvaultError, VidvaultResult};

use crate::digest::{digest_file, verify_digest, ContentDigest, DigestWriter};
use crate::kdf::derive_key;
use crate::stream::{decrypt_stream_with_chunk_size, encrypt_stream_with_chunk_size, TransformStats};

/// Which inputs the service accepts
#[derive(Debug, Clone, Default)]
pub struct FilePolicy {
    /// Lowercase extensions without the dot; empty accepts everything
    pub allowed_extensions: Vec<String>,
    /// Largest accepted input in bytes (0 = unlimited)
    pub max_input_bytes: u64,
}

impl FilePolicy {
    pub fn from_config(config: &FilesConfig) -> VidvaultResult<Self> {
        Ok(Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_input_bytes: config.max_input_bytes()?,
        })
    }

    /// Accept any file of any size.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Check `path` against the policy and return its size in bytes.
    pub fn check(&self, path: &Path) -> VidvaultResult<u64> {
        if !self.allowed_extensions.is_empty() {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if !self.allowed_extensions.iter().any(|a| *a == ext) {
                return Err(VidvaultError::FileRejected(format!(
                    "{}: extension '{ext}' not in [{}]",
                    path.display(),
                    self.allowed_extensions.join(", ")
                )));
            }
        }

        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(VidvaultError::FileRejected(format!(
                "{}: not a regular file",
                path.display()
            )));
        }
        if self.max_input_bytes > 0 && meta.len() > self.max_input_bytes {
            return Err(VidvaultError::FileRejected(format!(
                "{}: {} bytes exceeds limit of {} bytes",
                path.display(),
                meta.len(),
                self.max_input_bytes
            )));
        }
        Ok(meta.len())
    }
}

/// `movie.mp4` → `movie.mp4.enc`
pub fn encrypted_name(input: &Path, suffix: &str) -> String {
    let name = file_name(input);
    format!("{name}.{suffix}")
}

/// `movie.mp4.enc` → `decrypted_movie.mp4`; names without the suffix keep
/// their full name.
pub fn decrypted_name(artifact: &Path, prefix: &str, suffix: &str) -> String {
    let name = file_name(artifact);
    let dotted = format!(".{suffix}");
    let stem = name.strip_suffix(dotted.as_str()).unwrap_or(&name);
    format!("{prefix}{stem}")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string())
}

/// Remove a file if it exists.
///
/// Returns `Ok(true)` if a file was removed and `Ok(false)` if there was
/// nothing to remove. Permission and other failures are returned as errors.
pub fn remove_artifact(path: &Path) -> VidvaultResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Temporary output beside `target`, renamed onto it by [`commit`](Self::commit).
///
/// Dropping an uncommitted artifact deletes the temporary file only.
struct PartialArtifact<'a> {
    target: &'a Path,
    temp: Option<NamedTempFile>,
}

impl<'a> PartialArtifact<'a> {
    fn create(target: &'a Path) -> VidvaultResult<Self> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)?;
        Ok(Self {
            target,
            temp: Some(temp),
        })
    }

    fn writer(&self) -> VidvaultResult<BufWriter<File>> {
        let temp = self
            .temp
            .as_ref()
            .ok_or_else(|| VidvaultError::Other(anyhow::anyhow!("artifact already committed")))?;
        Ok(BufWriter::new(temp.reopen()?))
    }

    fn commit(mut self) -> VidvaultResult<()> {
        if let Some(temp) = self.temp.take() {
            temp.persist(self.target).map_err(|e| VidvaultError::Io(e.error))?;
        }
        Ok(())
    }
}

impl Drop for PartialArtifact<'_> {
    fn drop(&mut self) {
        let Some(temp) = self.temp.take() else {
            return;
        };
        let path = temp.path().to_path_buf();
        match temp.close() {
            Ok(()) => warn!(
                path = %path.display(),
                target = %self.target.display(),
                "discarded partial output"
            ),
            Err(e) => warn!(path = %path.display(), "failed to remove partial output: {e}"),
        }
    }
}

fn reject_same_path(input: &Path, output: &Path) -> VidvaultResult<()> {
    let same = match (std::fs::canonicalize(input), std::fs::canonicalize(output)) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    };
    if same {
        return Err(VidvaultError::FileRejected(format!(
            "{}: input and output are the same file",
            input.display()
        )));
    }
    Ok(())
}

/// Encrypt `input` into `output` (`IV || ciphertext`).
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    password: &SecretString,
    algorithm: CipherAlgorithm,
    chunk_size: usize,
) -> VidvaultResult<TransformStats> {
    let key = derive_key(password, algorithm)?;
    reject_same_path(input, output)?;

    let reader = BufReader::new(File::open(input)?);
    let artifact = PartialArtifact::create(output)?;
    let stats =
        encrypt_stream_with_chunk_size(reader, artifact.writer()?, &key, algorithm, chunk_size)?;
    artifact.commit()?;

    info!(
        input = %input.display(),
        output = %output.display(),
        %algorithm,
        bytes = stats.bytes_in,
        "encrypted file"
    );
    Ok(stats)
}

/// Decrypt `input` (`IV || ciphertext`) into `output`.
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    password: &SecretString,
    algorithm: CipherAlgorithm,
    chunk_size: usize,
) -> VidvaultResult<TransformStats> {
    let key = derive_key(password, algorithm)?;
    reject_same_path(input, output)?;

    let reader = BufReader::new(File::open(input)?);
    let artifact = PartialArtifact::create(output)?;
    let stats =
        decrypt_stream_with_chunk_size(reader, artifact.writer()?, &key, algorithm, chunk_size)?;
    artifact.commit()?;

    info!(
        input = %input.display(),
        output = %output.display(),
        %algorithm,
        bytes = stats.bytes_out,
        "decrypted file"
    );
    Ok(stats)
}

/// What a caller needs to verify a later decryption. Never holds the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionReceipt {
    pub original_name: String,
    pub artifact: PathBuf,
    pub algorithm: CipherAlgorithm,
    pub digest: ContentDigest,
    pub plaintext_bytes: u64,
    pub artifact_bytes: u64,
}

/// Fingerprint `input`, then encrypt it into `output`.
pub fn encrypt_with_receipt(
    input: &Path,
    output: &Path,
    password: &SecretString,
    algorithm: CipherAlgorithm,
    digest_algorithm: DigestAlgorithm,
    chunk_size: usize,
) -> VidvaultResult<EncryptionReceipt> {
    let digest = digest_file(input, digest_algorithm)?;
    let stats = encrypt_file(input, output, password, algorithm, chunk_size)?;

    Ok(EncryptionReceipt {
        original_name: file_name(input),
        artifact: output.to_path_buf(),
        algorithm,
        digest,
        plaintext_bytes: stats.bytes_in,
        artifact_bytes: stats.bytes_out,
    })
}

/// Result of comparing recovered plaintext with an expected digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    /// No expected digest was supplied
    Unchecked,
    Verified,
    Mismatch { expected: ContentDigest },
}

/// A completed decryption. The output file is kept even on a digest
/// mismatch; [`DecryptOutcome::check`] turns a mismatch into an error.
#[derive(Debug, Clone)]
pub struct DecryptOutcome {
    pub stats: TransformStats,
    pub digest: ContentDigest,
    pub integrity: Integrity,
}

impl DecryptOutcome {
    pub fn check(&self) -> VidvaultResult<()> {
        match &self.integrity {
            Integrity::Mismatch { expected } => verify_digest(expected, &self.digest),
            Integrity::Unchecked | Integrity::Verified => Ok(()),
        }
    }
}

/// Decrypt `input` into `output`, hashing the plaintext as it is written and
/// comparing against `expected` when given.
pub fn decrypt_and_verify(
    input: &Path,
    output: &Path,
    password: &SecretString,
    algorithm: CipherAlgorithm,
    expected: Option<&ContentDigest>,
    digest_algorithm: DigestAlgorithm,
    chunk_size: usize,
) -> VidvaultResult<DecryptOutcome> {
    let key = derive_key(password, algorithm)?;
    reject_same_path(input, output)?;
    let digest_algorithm = expected.map(ContentDigest::algorithm).unwrap_or(digest_algorithm);

    let reader = BufReader::new(File::open(input)?);
    let artifact = PartialArtifact::create(output)?;
    let mut writer = DigestWriter::new(artifact.writer()?, digest_algorithm);
    let stats = decrypt_stream_with_chunk_size(reader, &mut writer, &key, algorithm, chunk_size)?;
    let (file, digest) = writer.finish()?;
    drop(file);
    artifact.commit()?;

    let integrity = match expected {
        None => Integrity::Unchecked,
        Some(exp) if verify_digest(exp, &digest).is_ok() => Integrity::Verified,
        Some(exp) => {
            warn!(
                output = %output.display(),
                expected = %exp,
                actual = %digest,
                "decrypted file does not match original digest"
            );
            Integrity::Mismatch {
                expected: exp.clone(),
            }
        }
    };

    Ok(DecryptOutcome {
        stats,
        digest,
        integrity,
    })
}
