use thiserror::Error;

pub type VidvaultResult<T> = Result<T, VidvaultError>;

#[derive(Debug, Error)]
pub enum VidvaultError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid chunk size {chunk_size}: must be a non-zero multiple of {block_size}")]
    InvalidChunkSize { chunk_size: usize, block_size: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt input: missing IV (expected {expected} bytes, found {actual})")]
    MissingIv { expected: usize, actual: usize },

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("invalid padding: likely wrong password or corrupted file")]
    Padding,

    #[error("integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("file rejected: {0}")]
    FileRejected(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VidvaultError {
    /// True when the caller can reasonably retry with a different password.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Padding | Self::IntegrityMismatch { .. })
    }
}
