//! Streaming CBC encryption/decryption between two byte streams
//!
//! Each call owns its cipher context and two chunk buffers (current +
//! lookahead). The lookahead read decides whether the current chunk is the
//! last one: only the last plaintext chunk is PKCS#7 padded, and only the
//! last ciphertext chunk is unpadded.

use std::io::{ErrorKind, Read, Write};

use aes::Aes256;
use blowfish::Blowfish;
use cbc::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockCipher, BlockDecryptMut,
    BlockEncryptMut, InnerIvInit, KeyInit,
};
use rand::RngCore;
use secrecy::SecretString;
use tracing::{debug, warn};

use vidvault_core::{CipherAlgorithm, VidvaultError, VidvaultResult};

use crate::kdf::{derive_key, DerivedKey};
use crate::CHUNK_SIZE;

/// Byte and chunk counts for one transform.
///
/// `bytes_in` / `bytes_out` include the IV on the side where it appears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunks: u64,
}

/// Encrypt `reader` into `writer` as `IV || ciphertext` using 64 KiB chunks.
pub fn encrypt_stream<R: Read, W: Write>(
    reader: R,
    writer: W,
    key: &DerivedKey,
    algorithm: CipherAlgorithm,
) -> VidvaultResult<TransformStats> {
    encrypt_stream_with_chunk_size(reader, writer, key, algorithm, CHUNK_SIZE)
}

/// Decrypt an `IV || ciphertext` stream from `reader` into `writer`.
pub fn decrypt_stream<R: Read, W: Write>(
    reader: R,
    writer: W,
    key: &DerivedKey,
    algorithm: CipherAlgorithm,
) -> VidvaultResult<TransformStats> {
    decrypt_stream_with_chunk_size(reader, writer, key, algorithm, CHUNK_SIZE)
}

/// Derive the key from `password`, then [`encrypt_stream`].
pub fn encrypt_with_password<R: Read, W: Write>(
    reader: R,
    writer: W,
    password: &SecretString,
    algorithm: CipherAlgorithm,
) -> VidvaultResult<TransformStats> {
    let key = derive_key(password, algorithm)?;
    encrypt_stream(reader, writer, &key, algorithm)
}

/// Derive the key from `password`, then [`decrypt_stream`].
pub fn decrypt_with_password<R: Read, W: Write>(
    reader: R,
    writer: W,
    password: &SecretString,
    algorithm: CipherAlgorithm,
) -> VidvaultResult<TransformStats> {
    let key = derive_key(password, algorithm)?;
    decrypt_stream(reader, writer, &key, algorithm)
}

/// [`encrypt_stream`] with an explicit chunk size.
///
/// `chunk_size` must be a non-zero multiple of the algorithm's block size so
/// that every chunk except the last is block-aligned.
pub fn encrypt_stream_with_chunk_size<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &DerivedKey,
    algorithm: CipherAlgorithm,
    chunk_size: usize,
) -> VidvaultResult<TransformStats> {
    check_params(key, algorithm, chunk_size)?;

    let mut iv = vec![0u8; algorithm.block_size()];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut stats = match algorithm {
        CipherAlgorithm::Aes => {
            let enc = encryptor::<Aes256>(key, &iv)?;
            writer.write_all(&iv)?;
            encrypt_chunks(enc, &mut reader, &mut writer, chunk_size)?
        }
        CipherAlgorithm::Blowfish => {
            let enc = encryptor::<Blowfish>(key, &iv)?;
            writer.write_all(&iv)?;
            encrypt_chunks(enc, &mut reader, &mut writer, chunk_size)?
        }
    };
    writer.flush()?;
    stats.bytes_out += iv.len() as u64;

    debug!(
        algorithm = %algorithm,
        chunks = stats.chunks,
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        "encrypted stream"
    );
    Ok(stats)
}

/// [`decrypt_stream`] with an explicit chunk size (see
/// [`encrypt_stream_with_chunk_size`]). The chunk size does not need to match
/// the one used for encryption.
pub fn decrypt_stream_with_chunk_size<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &DerivedKey,
    algorithm: CipherAlgorithm,
    chunk_size: usize,
) -> VidvaultResult<TransformStats> {
    check_params(key, algorithm, chunk_size)?;

    let block_size = algorithm.block_size();
    let mut iv = vec![0u8; block_size];
    let got = read_chunk(&mut reader, &mut iv)?;
    if got < block_size {
        return Err(VidvaultError::MissingIv {
            expected: block_size,
            actual: got,
        });
    }

    let mut stats = match algorithm {
        CipherAlgorithm::Aes => {
            let dec = decryptor::<Aes256>(key, &iv)?;
            decrypt_chunks(dec, &mut reader, &mut writer, chunk_size)?
        }
        CipherAlgorithm::Blowfish => {
            let dec = decryptor::<Blowfish>(key, &iv)?;
            decrypt_chunks(dec, &mut reader, &mut writer, chunk_size)?
        }
    };
    writer.flush()?;
    stats.bytes_in += block_size as u64;

    debug!(
        algorithm = %algorithm,
        chunks = stats.chunks,
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        "decrypted stream"
    );
    Ok(stats)
}

fn check_params(
    key: &DerivedKey,
    algorithm: CipherAlgorithm,
    chunk_size: usize,
) -> VidvaultResult<()> {
    if key.len() != algorithm.key_len() {
        return Err(VidvaultError::InvalidKeyLength {
            expected: algorithm.key_len(),
            actual: key.len(),
        });
    }
    let block_size = algorithm.block_size();
    if chunk_size == 0 || chunk_size % block_size != 0 {
        return Err(VidvaultError::InvalidChunkSize {
            chunk_size,
            block_size,
        });
    }
    Ok(())
}

fn encryptor<C>(key: &DerivedKey, iv: &[u8]) -> VidvaultResult<cbc::Encryptor<C>>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| VidvaultError::InvalidKeyLength {
        expected: C::key_size(),
        actual: key.len(),
    })?;
    cbc::Encryptor::inner_iv_slice_init(cipher, iv)
        .map_err(|_| VidvaultError::Other(anyhow::anyhow!("IV length {} rejected", iv.len())))
}

fn decryptor<C>(key: &DerivedKey, iv: &[u8]) -> VidvaultResult<cbc::Decryptor<C>>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| VidvaultError::InvalidKeyLength {
        expected: C::key_size(),
        actual: key.len(),
    })?;
    cbc::Decryptor::inner_iv_slice_init(cipher, iv)
        .map_err(|_| VidvaultError::Other(anyhow::anyhow!("IV length {} rejected", iv.len())))
}

fn encrypt_chunks<E, R, W>(
    mut enc: E,
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
) -> VidvaultResult<TransformStats>
where
    E: BlockEncryptMut,
    R: Read,
    W: Write,
{
    let block_size = E::block_size();
    // Room for one extra block of padding on the last chunk
    let mut current = vec![0u8; chunk_size + block_size];
    let mut lookahead = vec![0u8; chunk_size + block_size];
    let mut stats = TransformStats::default();

    let mut len = read_chunk(reader, &mut current[..chunk_size])?;
    loop {
        // A short chunk already hit EOF; only a full one needs the lookahead
        let next_len = if len == chunk_size {
            read_chunk(reader, &mut lookahead[..chunk_size])?
        } else {
            0
        };
        stats.bytes_in += len as u64;
        stats.chunks += 1;

        if next_len == 0 {
            let ciphertext = enc
                .encrypt_padded_mut::<Pkcs7>(&mut current, len)
                .map_err(|_| VidvaultError::Other(anyhow::anyhow!("padding buffer too small")))?;
            writer.write_all(ciphertext)?;
            stats.bytes_out += ciphertext.len() as u64;
            return Ok(stats);
        }

        for block in current[..len].chunks_exact_mut(block_size) {
            enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer.write_all(&current[..len])?;
        stats.bytes_out += len as u64;

        std::mem::swap(&mut current, &mut lookahead);
        len = next_len;
    }
}

fn decrypt_chunks<D, R, W>(
    mut dec: D,
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
) -> VidvaultResult<TransformStats>
where
    D: BlockDecryptMut,
    R: Read,
    W: Write,
{
    let block_size = D::block_size();
    let mut current = vec![0u8; chunk_size];
    let mut lookahead = vec![0u8; chunk_size];
    let mut stats = TransformStats::default();

    let mut len = read_chunk(reader, &mut current)?;
    if len == 0 {
        return Err(VidvaultError::MalformedCiphertext(
            "no ciphertext blocks after IV".into(),
        ));
    }

    loop {
        let next_len = if len == chunk_size {
            read_chunk(reader, &mut lookahead)?
        } else {
            0
        };
        stats.bytes_in += len as u64;
        stats.chunks += 1;

        if len % block_size != 0 {
            return Err(VidvaultError::MalformedCiphertext(format!(
                "ciphertext length is not a multiple of the {block_size}-byte block size"
            )));
        }

        if next_len == 0 {
            let plaintext = dec.decrypt_padded_mut::<Pkcs7>(&mut current[..len]).map_err(|_| {
                warn!(chunks = stats.chunks, "final block has invalid padding");
                VidvaultError::Padding
            })?;
            writer.write_all(plaintext)?;
            stats.bytes_out += plaintext.len() as u64;
            return Ok(stats);
        }

        for block in current[..len].chunks_exact_mut(block_size) {
            dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer.write_all(&current[..len])?;
        stats.bytes_out += len as u64;

        std::mem::swap(&mut current, &mut lookahead);
        len = next_len;
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes read; less than `buf.len()` means EOF.
pub(crate) fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::KeyIvInit;
    use std::io::Cursor;

    fn key_for(alg: CipherAlgorithm) -> DerivedKey {
        derive_key(&SecretString::from("stream-test"), alg).unwrap()
    }

    fn encrypt_vec(data: &[u8], alg: CipherAlgorithm, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt_stream_with_chunk_size(Cursor::new(data), &mut out, &key_for(alg), alg, chunk)
            .unwrap();
        out
    }

    fn decrypt_vec(data: &[u8], alg: CipherAlgorithm, chunk: usize) -> VidvaultResult<Vec<u8>> {
        let mut out = Vec::new();
        decrypt_stream_with_chunk_size(Cursor::new(data), &mut out, &key_for(alg), alg, chunk)?;
        Ok(out)
    }

    /// Hands out at most `step` bytes per read and interrupts every other call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
        interrupt: bool,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(std::io::Error::new(ErrorKind::Interrupted, "try again"));
            }
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_input_is_iv_plus_one_block() {
        for alg in CipherAlgorithm::ALL {
            let bs = alg.block_size();
            let encrypted = encrypt_vec(b"", alg, CHUNK_SIZE);
            assert_eq!(encrypted.len(), 2 * bs);

            let decrypted = decrypt_vec(&encrypted, alg, CHUNK_SIZE).unwrap();
            assert!(decrypted.is_empty());
        }
    }

    #[test]
    fn test_block_aligned_input_gets_full_padding_block() {
        for alg in CipherAlgorithm::ALL {
            let bs = alg.block_size();
            let data = vec![7u8; bs * 3];
            let encrypted = encrypt_vec(&data, alg, CHUNK_SIZE);
            assert_eq!(encrypted.len(), bs + bs * 4);
        }
    }

    #[test]
    fn test_matches_one_shot_cbc() {
        let alg = CipherAlgorithm::Aes;
        let key = key_for(alg);
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 31 % 251) as u8).collect();

        // 64-byte chunks force many non-final chunks through the block loop
        let encrypted = encrypt_vec(&data, alg, 64);
        let (iv, body) = encrypted.split_at(16);

        let expected = cbc::Encryptor::<Aes256>::new_from_slices(key.as_bytes(), iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(&data);
        assert_eq!(body, expected.as_slice());
    }

    #[test]
    fn test_blowfish_matches_one_shot_cbc() {
        let alg = CipherAlgorithm::Blowfish;
        let key = key_for(alg);
        let data = b"the quick brown fox jumps over the lazy dog".repeat(9);

        let encrypted = encrypt_vec(&data, alg, 32);
        let (iv, body) = encrypted.split_at(8);

        let cipher = <Blowfish as KeyInit>::new_from_slice(key.as_bytes()).unwrap();
        let expected = cbc::Encryptor::<Blowfish>::inner_iv_slice_init(cipher, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(&data);
        assert_eq!(body, expected.as_slice());
    }

    #[test]
    fn test_decrypt_chunk_size_independent_of_encrypt() {
        let alg = CipherAlgorithm::Aes;
        let data = vec![0x5Au8; 5000];
        let encrypted = encrypt_vec(&data, alg, 4096);
        assert_eq!(decrypt_vec(&encrypted, alg, 48).unwrap(), data);
        assert_eq!(decrypt_vec(&encrypted, alg, CHUNK_SIZE).unwrap(), data);
    }

    #[test]
    fn test_short_and_interrupted_reads() {
        for alg in CipherAlgorithm::ALL {
            let data: Vec<u8> = (0..777u32).map(|i| i as u8).collect();
            let key = key_for(alg);

            let mut encrypted = Vec::new();
            let reader = Trickle { data: &data, step: 5, interrupt: false };
            encrypt_stream_with_chunk_size(reader, &mut encrypted, &key, alg, 64).unwrap();

            let mut decrypted = Vec::new();
            let reader = Trickle { data: &encrypted, step: 3, interrupt: false };
            decrypt_stream_with_chunk_size(reader, &mut decrypted, &key, alg, 64).unwrap();
            assert_eq!(decrypted, data);
        }
    }

    #[test]
    fn test_stats() {
        let alg = CipherAlgorithm::Aes;
        let key = key_for(alg);
        let data = vec![1u8; 100];

        let mut encrypted = Vec::new();
        let stats =
            encrypt_stream_with_chunk_size(Cursor::new(&data), &mut encrypted, &key, alg, 32)
                .unwrap();
        assert_eq!(stats.bytes_in, 100);
        assert_eq!(stats.bytes_out, encrypted.len() as u64);
        assert_eq!(stats.chunks, 4);

        let mut decrypted = Vec::new();
        let stats =
            decrypt_stream_with_chunk_size(Cursor::new(&encrypted), &mut decrypted, &key, alg, 32)
                .unwrap();
        assert_eq!(stats.bytes_in, encrypted.len() as u64);
        assert_eq!(stats.bytes_out, 100);
    }

    #[test]
    fn test_missing_iv() {
        let err = decrypt_vec(&[1, 2, 3], CipherAlgorithm::Aes, CHUNK_SIZE).unwrap_err();
        assert!(matches!(
            err,
            VidvaultError::MissingIv { expected: 16, actual: 3 }
        ));

        let err = decrypt_vec(&[], CipherAlgorithm::Blowfish, CHUNK_SIZE).unwrap_err();
        assert!(matches!(err, VidvaultError::MissingIv { expected: 8, actual: 0 }));
    }

    #[test]
    fn test_iv_without_ciphertext() {
        let err = decrypt_vec(&[0u8; 16], CipherAlgorithm::Aes, CHUNK_SIZE).unwrap_err();
        assert!(matches!(err, VidvaultError::MalformedCiphertext(_)));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let alg = CipherAlgorithm::Aes;
        let mut encrypted = encrypt_vec(&[9u8; 40], alg, CHUNK_SIZE);
        encrypted.pop();
        let err = decrypt_vec(&encrypted, alg, CHUNK_SIZE).unwrap_err();
        assert!(matches!(err, VidvaultError::MalformedCiphertext(_)));
    }

    #[test]
    fn test_wrong_key_length_rejected_before_io() {
        let key = DerivedKey::from_bytes(vec![0u8; 16]);
        let mut out = Vec::new();
        let err = encrypt_stream(Cursor::new(b"data"), &mut out, &key, CipherAlgorithm::Aes)
            .unwrap_err();
        assert!(matches!(
            err,
            VidvaultError::InvalidKeyLength { expected: 32, actual: 16 }
        ));
        assert!(out.is_empty(), "nothing may be written on a rejected key");
    }

    #[test]
    fn test_invalid_chunk_size() {
        let alg = CipherAlgorithm::Aes;
        let mut out = Vec::new();
        for chunk in [0, 10, 24] {
            let err = encrypt_stream_with_chunk_size(
                Cursor::new(b"data"),
                &mut out,
                &key_for(alg),
                alg,
                chunk,
            )
            .unwrap_err();
            assert!(matches!(err, VidvaultError::InvalidChunkSize { .. }));
        }
        // 24 is fine for Blowfish's 8-byte blocks
        let bf = CipherAlgorithm::Blowfish;
        assert!(encrypt_stream_with_chunk_size(
            Cursor::new(b"data"),
            &mut out,
            &key_for(bf),
            bf,
            24
        )
        .is_ok());
    }

    #[test]
    fn test_write_failure_is_io_error() {
        let alg = CipherAlgorithm::Blowfish;
        let err = encrypt_stream(Cursor::new(b"abc"), BrokenWriter, &key_for(alg), alg)
            .unwrap_err();
        assert!(matches!(err, VidvaultError::Io(_)));
    }

    #[test]
    fn test_with_password_roundtrip() {
        let password = SecretString::from("hunter2");
        let data = b"password helpers";

        let mut encrypted = Vec::new();
        encrypt_with_password(Cursor::new(data), &mut encrypted, &password, CipherAlgorithm::Aes)
            .unwrap();
        let mut decrypted = Vec::new();
        decrypt_with_password(
            Cursor::new(&encrypted),
            &mut decrypted,
            &password,
            CipherAlgorithm::Aes,
        )
        .unwrap();
        assert_eq!(decrypted, data);
    }
}
