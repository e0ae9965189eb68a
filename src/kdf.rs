//! NIST SP 800-108 counter-mode key-derivation function, realized with
//! AES-CMAC as the PRF. Only a single iteration is implemented since every
//! derivation this core needs produces exactly one 128-bit output block:
//! one derivation-data buffer, one CMAC call, built from the exact
//! counter/label/separator/context/length layout below.

use crate::aes128::CryptoError;
use crate::bytes::concat;
use crate::cmac;

/// Label for deriving the SDM file-data encryption session key.
pub const LABEL_SDM_ENC: &[u8] = b"SDMENCFileData";
/// Label for deriving the SDM file-read MAC session key.
pub const LABEL_SDM_MAC: &[u8] = b"SDMFileReadMAC";

/// Derive a 128-bit session key from `master_key`, `label` and the 16-byte
/// context `sv` (the Session Vector, all-zero in this unauthenticated-read
/// core).
///
/// Input block: `0x0001 || label || 0x00 || sv || 0x0080`.
pub fn derive(master_key: &[u8], label: &[u8], sv: &[u8]) -> Result<[u8; 16], CryptoError> {
    if sv.len() != 16 {
        return Err(CryptoError::InvalidIvLength(sv.len()));
    }

    let input = concat(&[
        &[0x00, 0x01],       // counter, big-endian, always 1 for a single block
        label,               // ASCII label
        &[0x00],             // separator
        sv,                  // 16-byte context
        &[0x00, 0x80],       // output length in bits (128), big-endian
    ]);

    cmac::cmac(master_key, &input)
}
