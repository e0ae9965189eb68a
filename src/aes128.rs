//! AES-128 block primitive plus the ECB and CTR wrappers this core needs.
//!
//! Only the raw block cipher from the `aes` crate is used; ECB and CTR are
//! built directly on top of it rather than pulled in from mode crates. The
//! exact semantics (no padding in ECB; a big-endian 128-bit counter
//! incremented per block, truncated on the last block) are specified down
//! to the byte, which is why this core owns the construction itself (see
//! DESIGN.md).

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use thiserror::Error;

/// Errors shared by the crypto primitives (`aes128`, `cmac`, `kdf`, `sdm`).
///
/// A key/IV/SV of the wrong length is a cryptographic precondition
/// violation: an implementation bug, not a reader-triggerable failure. It
/// is always surfaced to the caller rather than panicking, so the state
/// machine can convert it into SW `6F00` and log a diagnostic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key must be 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("IV must be 16 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("ECB data length must be a multiple of 16 bytes, got {0}")]
    InvalidDataLength(usize),
}

const BLOCK_SIZE: usize = 16;

fn cipher(key: &[u8]) -> Result<Aes128, CryptoError> {
    if key.len() != BLOCK_SIZE {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    Ok(Aes128::new(GenericArray::from_slice(key)))
}

/// Encrypt a single 16-byte block under `key`.
pub fn encrypt_block(key: &[u8], block: &[u8; 16]) -> Result<[u8; 16], CryptoError> {
    let c = cipher(key)?;
    let mut buf = GenericArray::clone_from_slice(block);
    c.encrypt_block(&mut buf);
    Ok(buf.into())
}

/// Decrypt a single 16-byte block under `key`.
pub fn decrypt_block(key: &[u8], block: &[u8; 16]) -> Result<[u8; 16], CryptoError> {
    let c = cipher(key)?;
    let mut buf = GenericArray::clone_from_slice(block);
    c.decrypt_block(&mut buf);
    Ok(buf.into())
}

/// AES-128-ECB encrypt. `data` must be a non-zero multiple of 16 bytes; no
/// padding is applied.
pub fn ecb_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidDataLength(data.len()));
    }
    let c = cipher(key)?;
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        c.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    Ok(out)
}

/// AES-128-ECB decrypt. `data` must be a non-zero multiple of 16 bytes; no
/// padding is removed.
pub fn ecb_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidDataLength(data.len()));
    }
    let c = cipher(key)?;
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        c.decrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    Ok(out)
}

/// AES-128-CTR keystream application (self-inverse: the same call encrypts
/// and decrypts). `iv` is interpreted as a big-endian 128-bit integer and
/// incremented by one per 16-byte block; the keystream for the final,
/// possibly-partial block is truncated to the remaining data length.
pub fn ctr_apply(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != BLOCK_SIZE {
        return Err(CryptoError::InvalidIvLength(iv.len()));
    }
    let c = cipher(key)?;

    let mut counter = u128::from_be_bytes(iv.try_into().expect("checked length above"));
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut keystream = GenericArray::clone_from_slice(&counter.to_be_bytes());
        c.encrypt_block(&mut keystream);
        for (d, k) in chunk.iter().zip(keystream.iter()) {
            out.push(d ^ k);
        }
        counter = counter.wrapping_add(1);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        crate::bytes::hex_decode(s).unwrap()
    }

    #[test]
    fn fips_197_test_vector() {
        let key = hex("2B7E151628AED2A6ABF7158809CF4F3C");
        let plaintext: [u8; 16] = hex("6BC1BEE22E409F96E93D7E117393172A")
            .try_into()
            .unwrap();
        let expected = hex("3AD77BB40D7A3660A89ECAF32466EF97");

        let ciphertext = encrypt_block(&key, &plaintext).unwrap();
        assert_eq!(ciphertext.to_vec(), expected);

        let roundtrip = decrypt_block(&key, &ciphertext).unwrap();
        assert_eq!(roundtrip, plaintext);
    }

    #[test]
    fn ecb_rejects_wrong_key_length() {
        let err = ecb_encrypt(&[0u8; 10], &[0u8; 16]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength(10));
    }

    #[test]
    fn ecb_rejects_unaligned_data() {
        let err = ecb_encrypt(&[0u8; 16], &[0u8; 17]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidDataLength(17));
    }

    #[test]
    fn ecb_roundtrip() {
        let key = [0x42u8; 16];
        let data = [0xAAu8; 48];
        let ct = ecb_encrypt(&key, &data).unwrap();
        let pt = ecb_decrypt(&key, &ct).unwrap();
        assert_eq!(pt, data.to_vec());
    }

    #[test]
    fn ctr_rejects_wrong_iv_length() {
        let err = ctr_apply(&[0u8; 16], &[0u8; 15], &[0u8; 10]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidIvLength(15));
    }

    #[test]
    fn ctr_is_self_inverse() {
        let key = [0x11u8; 16];
        let iv = [0u8; 16];
        let plaintext = b"the quick brown fox jumps over".to_vec();

        let ciphertext = ctr_apply(&key, &iv, &plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let roundtrip = ctr_apply(&key, &iv, &ciphertext).unwrap();
        assert_eq!(roundtrip, plaintext);
    }

    #[test]
    fn ctr_handles_partial_final_block() {
        let key = [0x99u8; 16];
        let iv = [0u8; 16];
        // 10 bytes, like PICCData: exercises the truncated last-block path.
        let data = [0x01u8; 10];
        let ct = ctr_apply(&key, &iv, &data).unwrap();
        assert_eq!(ct.len(), 10);
        let pt = ctr_apply(&key, &iv, &ct).unwrap();
        assert_eq!(pt, data.to_vec());
    }

    #[test]
    fn ctr_increments_counter_across_blocks() {
        let key = [0x07u8; 16];
        let iv = [0u8; 16];
        let data = [0u8; 32];
        let ct = ctr_apply(&key, &iv, &data).unwrap();
        // Second block's keystream must differ from the first (counter advanced).
        assert_ne!(&ct[0..16], &ct[16..32]);
    }

    #[test]
    fn ctr_counter_wraps_at_128_bits() {
        let key = [0x05u8; 16];
        let mut iv = [0xFFu8; 16];
        // Force a wraparound after the first block.
        let data = [0u8; 32];
        let ct = ctr_apply(&key, &iv, &data).unwrap();
        iv = [0u8; 16];
        let expected_second_block_key = encrypt_block(&key, &iv).unwrap();
        assert_eq!(&ct[16..32], &expected_second_block_key[..]);
    }

    quickcheck::quickcheck! {
        fn ctr_roundtrip_law(key_seed: u8, data: Vec<u8>) -> bool {
            let key = [key_seed; 16];
            let iv = [0u8; 16];
            let ct = ctr_apply(&key, &iv, &data).unwrap();
            let pt = ctr_apply(&key, &iv, &ct).unwrap();
            pt == data
        }
    }
}
