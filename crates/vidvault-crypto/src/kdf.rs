//! Key derivation: password → fixed-length cipher key
//!
//! The key is the SHA-256 digest of the UTF-8 password, truncated to the
//! algorithm's key length (all 32 bytes for AES-256, the first 16 for
//! Blowfish). There is no salt: the same password and algorithm always give
//! the same key, and two files encrypted that way differ only by their IV.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use vidvault_core::{CipherAlgorithm, VidvaultError, VidvaultResult};

/// A symmetric key derived for exactly one algorithm.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: Vec<u8>,
}

impl DerivedKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the cipher key for `algorithm` from a password.
pub fn derive_key(
    password: &SecretString,
    algorithm: CipherAlgorithm,
) -> VidvaultResult<DerivedKey> {
    let password = password.expose_secret();
    if password.is_empty() {
        return Err(VidvaultError::EmptyPassword);
    }

    let mut digest = Sha256::digest(password.as_bytes());
    let key = DerivedKey::from_bytes(digest[..algorithm.key_len()].to_vec());
    digest.as_mut_slice().zeroize();

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("correct horse battery staple");

        for alg in CipherAlgorithm::ALL {
            let key1 = derive_key(&password, alg).unwrap();
            let key2 = derive_key(&password, alg).unwrap();
            assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
        }
    }

    #[test]
    fn test_kdf_key_lengths() {
        let password = SecretString::from("pw");
        assert_eq!(derive_key(&password, CipherAlgorithm::Aes).unwrap().len(), 32);
        assert_eq!(derive_key(&password, CipherAlgorithm::Blowfish).unwrap().len(), 16);
    }

    #[test]
    fn test_blowfish_key_is_aes_key_prefix() {
        let password = SecretString::from("shared");
        let aes = derive_key(&password, CipherAlgorithm::Aes).unwrap();
        let bf = derive_key(&password, CipherAlgorithm::Blowfish).unwrap();
        assert_eq!(&aes.as_bytes()[..16], bf.as_bytes());
    }

    #[test]
    fn test_kdf_known_vector() {
        // SHA-256("abc")
        let key = derive_key(&SecretString::from("abc"), CipherAlgorithm::Aes).unwrap();
        let hex: String = key.as_bytes().iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(
            hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_kdf_different_passwords() {
        let key1 = derive_key(&SecretString::from("password-a"), CipherAlgorithm::Aes).unwrap();
        let key2 = derive_key(&SecretString::from("password-b"), CipherAlgorithm::Aes).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_rejects_empty_password() {
        let err = derive_key(&SecretString::from(""), CipherAlgorithm::Aes).unwrap_err();
        assert!(matches!(err, VidvaultError::EmptyPassword));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = derive_key(&SecretString::from("abc"), CipherAlgorithm::Aes).unwrap();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("186"), "raw key bytes must not appear");
    }
}
