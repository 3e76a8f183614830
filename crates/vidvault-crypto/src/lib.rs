//! vidvault-crypto: streaming CBC file encryption
//!
//! Pipeline: password → SHA-256 key → CBC(AES-256 | Blowfish) over 64 KiB chunks
//!
//! Artifact format (binary):
//! ```text
//! [block_size bytes: random IV][N * block_size bytes: ciphertext, PKCS#7 padded]
//! ```
//!
//! Only the final chunk is padded. Decryption finds the final chunk by
//! reading one chunk ahead, so the input length never needs to be known.
//! There is no authentication tag; a whole-file digest of the plaintext
//! (see [`digest`]) is the only integrity signal.

pub mod digest;
pub mod files;
pub mod kdf;
pub mod stream;

pub use digest::{digest_file, digest_stream, verify_digest, ContentDigest, DigestWriter};
pub use files::{
    decrypt_file, decrypt_and_verify, encrypt_file, encrypt_with_receipt, remove_artifact,
    DecryptOutcome, EncryptionReceipt, FilePolicy, Integrity,
};
pub use kdf::{derive_key, DerivedKey};
pub use stream::{
    decrypt_stream, decrypt_stream_with_chunk_size, decrypt_with_password, encrypt_stream,
    encrypt_stream_with_chunk_size, encrypt_with_password, TransformStats,
};

/// Default streaming chunk size (64 KiB, a multiple of every supported block size)
pub const CHUNK_SIZE: usize = 64 * 1024;
