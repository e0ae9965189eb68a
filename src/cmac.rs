//! AES-CMAC per NIST SP 800-38B: subkey derivation, the full 16-byte tag,
//! truncation to the 8 bytes SDM uses, and constant-time verification.

use crate::aes128::{self, CryptoError};
use crate::bytes::{constant_time_eq, pad_80_then_zero, shift_left_one, xor16};

const BLOCK_SIZE: usize = 16;

/// R_64 of NIST SP 800-38B for a 128-bit block cipher: the constant XORed
/// in whenever a left-shift-by-one would otherwise drop a `1` bit.
const RB: [u8; 16] = {
    let mut rb = [0u8; 16];
    rb[15] = 0x87;
    rb
};

/// Derive the two CMAC subkeys K1, K2 from the master key.
pub fn generate_subkeys(key: &[u8]) -> Result<([u8; 16], [u8; 16]), CryptoError> {
    let l = aes128::encrypt_block(key, &[0u8; 16])?;

    let (k1_shifted, l_msb) = shift_left_one(&l);
    let k1 = if l_msb {
        xor16(&k1_shifted, &RB)
    } else {
        k1_shifted
    };

    let (k2_shifted, k1_msb) = shift_left_one(&k1);
    let k2 = if k1_msb {
        xor16(&k2_shifted, &RB)
    } else {
        k2_shifted
    };

    Ok((k1, k2))
}

/// Compute the full 16-byte AES-CMAC tag of `message` under `key`.
pub fn cmac(key: &[u8], message: &[u8]) -> Result<[u8; 16], CryptoError> {
    let (k1, k2) = generate_subkeys(key)?;

    // Partition into 16-byte blocks, including the (possibly zero-length)
    // trailing block.
    let n_full_blocks = message.len() / BLOCK_SIZE;
    let remainder = message.len() % BLOCK_SIZE;
    let is_last_full = remainder == 0 && !message.is_empty();

    let n_blocks = if message.is_empty() {
        1
    } else if is_last_full {
        n_full_blocks
    } else {
        n_full_blocks + 1
    };

    let last_block = if message.is_empty() {
        xor16(&pad_80_then_zero(&[], BLOCK_SIZE).try_into().unwrap(), &k2)
    } else if is_last_full {
        let start = (n_blocks - 1) * BLOCK_SIZE;
        let block: [u8; 16] = message[start..start + BLOCK_SIZE].try_into().unwrap();
        xor16(&block, &k1)
    } else {
        let start = n_full_blocks * BLOCK_SIZE;
        let padded = pad_80_then_zero(&message[start..], BLOCK_SIZE);
        let block: [u8; 16] = padded.try_into().unwrap();
        xor16(&block, &k2)
    };

    let mut x = [0u8; 16];
    for i in 0..n_blocks - 1 {
        let block: [u8; 16] = message[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]
            .try_into()
            .unwrap();
        x = aes128::encrypt_block(key, &xor16(&x, &block))?;
    }
    let tag = aes128::encrypt_block(key, &xor16(&x, &last_block))?;

    Ok(tag)
}

/// Compute the AES-CMAC tag truncated to `len` bytes (SDM uses the
/// leftmost 8 bytes of the 16-byte tag).
pub fn cmac_truncated(key: &[u8], message: &[u8], len: usize) -> Result<Vec<u8>, CryptoError> {
    let tag = cmac(key, message)?;
    Ok(tag[..len].to_vec())
}

/// Verify a (possibly truncated) CMAC tag in constant time.
pub fn verify(key: &[u8], message: &[u8], tag: &[u8]) -> Result<bool, CryptoError> {
    let expected = cmac_truncated(key, message, tag.len())?;
    Ok(constant_time_eq(&expected, tag))
}
